//! Image rendering through external tools.
//!
//! | Operation | Tool |
//! |---|---|
//! | **Probe** | `identify -format %hx%w`, or `image::image_dimensions` |
//! | **Render (raster)** | `convert` crop → resize → rotate → colourspace → format |
//! | **Render (JPEG2000)** | `kdu_expand` region + reduction, then `convert` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for region and reduction math (unit testable)
//! - **Parameters**: [`ShellCommand`], the description of one tool invocation
//! - **Backend**: [`CommandRunner`] trait + [`ProcessRunner`]
//! - **Probe**: [`Prober`] and the lazily-probed [`SourceImage`]
//! - **Renderers**: command factories plus the [`Renderer`] implementations

pub mod backend;
pub mod calculations;
pub mod imagemagick;
pub mod kakadu;
mod params;
pub mod probe;

pub use backend::{BackendError, CommandRunner, ProcessRunner};
pub use imagemagick::ImageMagickRenderer;
pub use kakadu::KakaduRenderer;
pub use params::ShellCommand;
pub use probe::{ProbeMethod, Prober, SourceImage};

use crate::transform::Transformation;
use std::path::Path;

/// Turns a [`Transformation`] into output bytes for one source.
pub trait Renderer: Send + Sync {
    /// The commands [`render`](Renderer::render) would run, without running them.
    fn plan(
        &self,
        source: &SourceImage<'_>,
        transformation: &Transformation,
    ) -> Result<Vec<ShellCommand>, BackendError>;

    /// Run the pipeline and return the encoded image.
    fn render(
        &self,
        source: &SourceImage<'_>,
        transformation: &Transformation,
    ) -> Result<Vec<u8>, BackendError>;
}

/// The configured renderers and the rule choosing between them.
///
/// JPEG2000 sources go to the multi-resolution renderer when one is
/// configured; everything else uses the raster pipeline.
pub struct Renderers {
    pub raster: ImageMagickRenderer,
    pub jpeg2000: Option<KakaduRenderer>,
}

impl Renderers {
    pub fn for_source(&self, path: &Path) -> &dyn Renderer {
        let is_jp2 = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jp2"));
        match &self.jpeg2000 {
            Some(kakadu) if is_jp2 => kakadu,
            _ => &self.raster,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockRunner;
    use crate::transform::{Format, RenderParams};
    use std::sync::Arc;

    fn renderers(with_kakadu: bool) -> Renderers {
        let runner: Arc<dyn CommandRunner> = Arc::new(MockRunner::new());
        Renderers {
            raster: ImageMagickRenderer::new("convert", runner.clone()),
            jpeg2000: with_kakadu.then(|| {
                KakaduRenderer::new("kdu_expand", 4, 5, ImageMagickRenderer::new("convert", runner))
            }),
        }
    }

    fn first_program(renderers: &Renderers, file: &str) -> String {
        let prober = Prober::new(ProbeMethod::Identify, "identify", Arc::new(MockRunner::new()));
        let source = SourceImage::new(file, &prober);
        let t = Transformation::decode(&RenderParams::default().with_format("jpg"), &[Format::Jpg])
            .unwrap();
        renderers.for_source(source.path()).plan(&source, &t).unwrap()[0]
            .program
            .clone()
    }

    #[test]
    fn jp2_uses_kakadu_when_configured() {
        let r = renderers(true);
        assert_eq!(first_program(&r, "/img/a.jp2"), "kdu_expand");
        assert_eq!(first_program(&r, "/img/a.JP2"), "kdu_expand");
        assert_eq!(first_program(&r, "/img/a.tiff"), "convert");
    }

    #[test]
    fn jp2_falls_back_to_raster() {
        let r = renderers(false);
        assert_eq!(first_program(&r, "/img/a.jp2"), "convert");
    }
}
