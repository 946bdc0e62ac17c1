//! Raster pipeline renderer built on ImageMagick's `convert`.
//!
//! A [`Transformation`] becomes one `convert` invocation whose stages always
//! appear in this order, each only when it does something:
//!
//! ```text
//! convert [-crop G] [-resize G] [-virtual-pixel white +distort srt A]
//!         [-colorspace Gray [-type Bilevel]] <input> <format>:-
//! ```
//!
//! Later stages assume the geometry established by earlier ones, so the
//! order is fixed.
//!
//! Percentage crops are emitted in the tool's native percentage form
//! (`80%x70+18+13`): only the offsets are converted to pixels, because
//! `convert` cannot express percentage offsets.

use super::Renderer;
use super::backend::{BackendError, CommandRunner};
use super::calculations::{percent_of, square_crop};
use super::params::ShellCommand;
use super::probe::SourceImage;
use crate::transform::{Quality, Region, Size, Transformation};
use std::sync::Arc;

/// `-crop` geometry for a region, or `None` for the full image.
///
/// Only square and percentage regions consult the source dimensions.
pub fn crop_geometry(
    region: &Region,
    source: &SourceImage<'_>,
) -> Result<Option<String>, BackendError> {
    let geometry = match *region {
        Region::Full => return Ok(None),
        Region::Absolute {
            x,
            y,
            width,
            height,
        } => format!("{width}x{height}+{x}+{y}"),
        Region::Percentage {
            x,
            y,
            width,
            height,
        } => {
            let info = source.info()?;
            let offset_x = percent_of(info.width, x);
            let offset_y = percent_of(info.height, y);
            format!("{width}%x{height}+{offset_x}+{offset_y}")
        }
        Region::Square => {
            let b = square_crop(source.info()?);
            format!("{}x{}+{}+{}", b.width, b.height, b.x, b.y)
        }
    };
    Ok(Some(geometry))
}

/// `-resize` geometry for a size, or `None` for no resize.
///
/// `WxH!` forces both sides; a bare `WxH` fits inside the box.
pub fn resize_geometry(size: &Size) -> Option<String> {
    match *size {
        Size::Full => None,
        Size::Absolute {
            width: None,
            height: None,
        } => None,
        Size::Absolute {
            width: None,
            height: Some(h),
        } => Some(format!("x{h}")),
        Size::Absolute {
            width: Some(w),
            height: None,
        } => Some(w.to_string()),
        Size::Absolute {
            width: Some(w),
            height: Some(h),
        } => Some(format!("{w}x{h}!")),
        Size::Percent(pct) => Some(format!("{pct}%")),
        Size::BestFit { width, height } => Some(format!("{width}x{height}")),
    }
}

/// Builds the `convert` command for one transformation. Pure apart from a
/// possible dimension probe on `source`.
pub struct ConvertCommandFactory<'a> {
    program: &'a str,
    transformation: &'a Transformation,
}

impl<'a> ConvertCommandFactory<'a> {
    pub fn new(program: &'a str, transformation: &'a Transformation) -> Self {
        Self {
            program,
            transformation,
        }
    }

    pub fn command(&self, source: &SourceImage<'_>) -> Result<ShellCommand, BackendError> {
        let t = self.transformation;
        let mut cmd = ShellCommand::new(self.program);

        if let Some(crop) = crop_geometry(&t.region, source)? {
            cmd = cmd.arg("-crop").arg(crop);
        }
        if let Some(resize) = resize_geometry(&t.size) {
            cmd = cmd.arg("-resize").arg(resize);
        }
        if !t.rotation.is_identity() {
            cmd = cmd
                .args(["-virtual-pixel", "white", "+distort", "srt"])
                .arg(t.rotation.degrees().to_string());
        }
        match t.quality {
            Quality::Grey => cmd = cmd.args(["-colorspace", "Gray"]),
            Quality::Bitonal => cmd = cmd.args(["-colorspace", "Gray", "-type", "Bilevel"]),
            Quality::Default | Quality::Color => {}
        }

        Ok(cmd
            .path_arg(source.path())
            .arg(format!("{}:-", t.format.extension())))
    }
}

/// Renders any source `convert` can read, writing the result to stdout.
pub struct ImageMagickRenderer {
    convert: String,
    runner: Arc<dyn CommandRunner>,
}

impl ImageMagickRenderer {
    pub fn new(convert: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            convert: convert.into(),
            runner,
        }
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }
}

impl Renderer for ImageMagickRenderer {
    fn plan(
        &self,
        source: &SourceImage<'_>,
        transformation: &Transformation,
    ) -> Result<Vec<ShellCommand>, BackendError> {
        let cmd = ConvertCommandFactory::new(&self.convert, transformation).command(source)?;
        Ok(vec![cmd])
    }

    fn render(
        &self,
        source: &SourceImage<'_>,
        transformation: &Transformation,
    ) -> Result<Vec<u8>, BackendError> {
        let cmd = ConvertCommandFactory::new(&self.convert, transformation).command(source)?;
        let bytes = self.runner.execute(&cmd)?;
        if bytes.is_empty() {
            return Err(BackendError::EmptyOutput {
                command: cmd.to_string(),
            });
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockRunner;
    use crate::imaging::probe::{ProbeMethod, Prober};
    use crate::transform::{Format, RenderParams};

    const FILE: &str = "/images/world.jp2";

    struct Fixture {
        runner: Arc<MockRunner>,
        prober: Prober,
    }

    impl Fixture {
        /// Source reported by identify as 131 high, 175 wide.
        fn new() -> Self {
            let runner = Arc::new(MockRunner::with_dimensions("131x175"));
            let prober = Prober::new(ProbeMethod::Identify, "identify", runner.clone());
            Self { runner, prober }
        }

        fn command(&self, pairs: &[(&str, &str)]) -> String {
            let params = RenderParams::from_pairs(pairs.iter().copied());
            let t = Transformation::decode(&params, &[Format::Jpg, Format::Png]).unwrap();
            let source = SourceImage::new(FILE, &self.prober);
            ConvertCommandFactory::new("convert", &t)
                .command(&source)
                .unwrap()
                .to_string()
        }

        fn probes(&self) -> usize {
            self.runner
                .get_commands()
                .iter()
                .filter(|c| c.starts_with("identify"))
                .count()
        }
    }

    // =========================================================================
    // Region
    // =========================================================================

    #[test]
    fn full_region_is_a_plain_conversion() {
        let f = Fixture::new();
        assert_eq!(
            f.command(&[("region", "full"), ("format", "png")]),
            format!("convert {FILE} png:-")
        );
        assert_eq!(f.probes(), 0);
    }

    #[test]
    fn absolute_region_needs_no_probe() {
        let f = Fixture::new();
        assert_eq!(
            f.command(&[("region", "80,15,60,75"), ("format", "png")]),
            format!("convert -crop 60x75+80+15 {FILE} png:-")
        );
        assert_eq!(f.probes(), 0);
    }

    #[test]
    fn percent_region_keeps_percentage_extent() {
        let f = Fixture::new();
        assert_eq!(
            f.command(&[("region", "pct:10,10,80,70"), ("format", "png")]),
            format!("convert -crop 80%x70+18+13 {FILE} png:-")
        );
        assert_eq!(f.probes(), 1);
    }

    #[test]
    fn square_region() {
        let f = Fixture::new();
        assert_eq!(
            f.command(&[("region", "square"), ("format", "png")]),
            format!("convert -crop 131x131+22+0 {FILE} png:-")
        );
    }

    // =========================================================================
    // Size
    // =========================================================================

    #[test]
    fn resize_geometries() {
        let f = Fixture::new();
        let cases = [
            ("full", None),
            ("pct:50", Some("50%")),
            ("pct:12.5", Some("12.5%")),
            ("50,", Some("50")),
            (",50", Some("x50")),
            ("150,75", Some("150x75!")),
            ("!150,75", Some("150x75")),
        ];
        for (size, geometry) in cases {
            let expected = match geometry {
                Some(g) => format!("convert -resize {g} {FILE} png:-"),
                None => format!("convert {FILE} png:-"),
            };
            assert_eq!(f.command(&[("size", size), ("format", "png")]), expected);
        }
    }

    // =========================================================================
    // Rotation and quality
    // =========================================================================

    #[test]
    fn zero_rotation_emits_nothing() {
        let f = Fixture::new();
        assert_eq!(
            f.command(&[("rotation", "0"), ("format", "png")]),
            format!("convert {FILE} png:-")
        );
    }

    #[test]
    fn rotation_sets_background_before_distort() {
        let f = Fixture::new();
        assert_eq!(
            f.command(&[("rotation", "22.5"), ("format", "png")]),
            format!("convert -virtual-pixel white +distort srt 22.5 {FILE} png:-")
        );
    }

    #[test]
    fn quality_stages() {
        let f = Fixture::new();
        for q in ["default", "color"] {
            assert_eq!(
                f.command(&[("quality", q), ("format", "png")]),
                format!("convert {FILE} png:-")
            );
        }
        assert_eq!(
            f.command(&[("quality", "grey"), ("format", "png")]),
            format!("convert -colorspace Gray {FILE} png:-")
        );
        assert_eq!(
            f.command(&[("quality", "bitonal"), ("format", "png")]),
            format!("convert -colorspace Gray -type Bilevel {FILE} png:-")
        );
    }

    #[test]
    fn stages_keep_their_order() {
        let f = Fixture::new();
        assert_eq!(
            f.command(&[
                ("quality", "bitonal"),
                ("rotation", "90"),
                ("size", "!150,75"),
                ("region", "80,15,60,75"),
                ("format", "jpg"),
            ]),
            format!(
                "convert -crop 60x75+80+15 -resize 150x75 -virtual-pixel white +distort srt 90 \
                 -colorspace Gray -type Bilevel {FILE} jpg:-"
            )
        );
    }

    // =========================================================================
    // Renderer
    // =========================================================================

    #[test]
    fn render_returns_tool_output() {
        let f = Fixture::new();
        let renderer = ImageMagickRenderer::new("convert", f.runner.clone());
        let t = Transformation::decode(&RenderParams::default().with_format("jpg"), &[Format::Jpg])
            .unwrap();
        let source = SourceImage::new(FILE, &f.prober);
        assert_eq!(renderer.render(&source, &t).unwrap(), b"imagedata");
        assert_eq!(f.runner.get_commands(), vec![format!("convert {FILE} jpg:-")]);
    }

    #[test]
    fn render_rejects_empty_output() {
        let f = Fixture::new();
        f.runner.output.lock().unwrap().clear();
        let renderer = ImageMagickRenderer::new("convert", f.runner.clone());
        let t = Transformation::decode(&RenderParams::default().with_format("png"), &[Format::Png])
            .unwrap();
        let source = SourceImage::new(FILE, &f.prober);
        assert!(matches!(
            renderer.render(&source, &t),
            Err(BackendError::EmptyOutput { .. })
        ));
    }
}
