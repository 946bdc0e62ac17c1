//! JPEG2000 renderer built on Kakadu's `kdu_expand`.
//!
//! JPEG2000 stores a pyramid of power-of-two resolutions, so a thumbnail can
//! be decoded from a reduced level instead of the full image. Rendering is a
//! two-step pipeline:
//!
//! ```text
//! kdu_expand -quiet -i <input> [-region "{top,left},{height,width}"] [-reduce r]
//!            -num_threads N -o <intermediate.bmp>
//! convert <intermediate.bmp> ... <format>:-
//! ```
//!
//! The second step is the raster pipeline with the crop removed (already
//! done by the decoder) and percentage sizes scaled by `2^r` to account for
//! the reduced decode.

use super::Renderer;
use super::backend::BackendError;
use super::calculations::{fractional_region, reduction_factor};
use super::imagemagick::ImageMagickRenderer;
use super::params::ShellCommand;
use super::probe::SourceImage;
use crate::transform::{Region, Size, Transformation};
use std::path::Path;
use tracing::debug;

/// Builds the `kdu_expand` invocation for one transformation.
pub struct KakaduCommandFactory<'a> {
    program: &'a str,
    threads: u32,
    max_reduction: u32,
    transformation: &'a Transformation,
}

impl<'a> KakaduCommandFactory<'a> {
    pub fn new(
        program: &'a str,
        threads: u32,
        max_reduction: u32,
        transformation: &'a Transformation,
    ) -> Self {
        Self {
            program,
            threads,
            max_reduction,
            transformation,
        }
    }

    /// The `-region` window, or `None` for a full-frame request.
    pub fn region(&self, source: &SourceImage<'_>) -> Result<Option<String>, BackendError> {
        let region = &self.transformation.region;
        if *region == Region::Full {
            return Ok(None);
        }
        let info = source.info()?;
        let f = fractional_region(region.resolve(info), info);
        Ok(Some(format!(
            "{{{},{}}},{{{},{}}}",
            f.top, f.left, f.height, f.width
        )))
    }

    /// Resolution level to decode at, computed against the cropped frame.
    ///
    /// `None` for a full-size request and for exact sizes that distort the
    /// aspect ratio: those are always decoded at full fidelity.
    pub fn reduction_factor(
        &self,
        source: &SourceImage<'_>,
    ) -> Result<Option<u32>, BackendError> {
        let t = self.transformation;
        if t.size == Size::Full {
            return Ok(None);
        }
        let frame = t.region.resolve(source.info()?).dimensions();
        Ok(t.size
            .aspect_preserving_target(frame)
            .and_then(|target| reduction_factor(frame, target, self.max_reduction)))
    }

    /// Full command, decoding `source` into `output`.
    pub fn command(
        &self,
        source: &SourceImage<'_>,
        output: &Path,
    ) -> Result<ShellCommand, BackendError> {
        let mut cmd = ShellCommand::new(self.program)
            .args(["-quiet", "-i"])
            .path_arg(source.path());
        if let Some(region) = self.region(source)? {
            cmd = cmd.arg("-region").arg(region);
        }
        if let Some(factor) = self.reduction_factor(source)? {
            cmd = cmd.arg("-reduce").arg(factor.to_string());
        }
        Ok(cmd
            .arg("-num_threads")
            .arg(self.threads.to_string())
            .arg("-o")
            .path_arg(output))
    }
}

/// The transformation applied to the decoder's output.
pub fn post_transformation(
    transformation: &Transformation,
    reduction: Option<u32>,
) -> Transformation {
    let post = transformation.without_crop();
    match reduction {
        Some(factor) => post.with_size(post.size.reduce(factor)),
        None => post,
    }
}

/// Decodes JPEG2000 sources with `kdu_expand`, finishing with `convert`.
pub struct KakaduRenderer {
    kdu_expand: String,
    threads: u32,
    max_reduction: u32,
    raster: ImageMagickRenderer,
}

impl KakaduRenderer {
    pub fn new(
        kdu_expand: impl Into<String>,
        threads: u32,
        max_reduction: u32,
        raster: ImageMagickRenderer,
    ) -> Self {
        Self {
            kdu_expand: kdu_expand.into(),
            threads,
            max_reduction,
            raster,
        }
    }

    fn factory<'a>(&'a self, transformation: &'a Transformation) -> KakaduCommandFactory<'a> {
        KakaduCommandFactory::new(
            &self.kdu_expand,
            self.threads,
            self.max_reduction,
            transformation,
        )
    }

    fn commands(
        &self,
        source: &SourceImage<'_>,
        transformation: &Transformation,
        intermediate: &Path,
    ) -> Result<(ShellCommand, Transformation), BackendError> {
        let factory = self.factory(transformation);
        let reduction = factory.reduction_factor(source)?;
        let decode = factory.command(source, intermediate)?;
        Ok((decode, post_transformation(transformation, reduction)))
    }
}

impl Renderer for KakaduRenderer {
    fn plan(
        &self,
        source: &SourceImage<'_>,
        transformation: &Transformation,
    ) -> Result<Vec<ShellCommand>, BackendError> {
        let intermediate = std::env::temp_dir().join("iiif-render-intermediate.bmp");
        let (decode, post) = self.commands(source, transformation, &intermediate)?;
        let decoded = source.derive(&intermediate);
        let mut plan = vec![decode];
        plan.extend(self.raster.plan(&decoded, &post)?);
        Ok(plan)
    }

    fn render(
        &self,
        source: &SourceImage<'_>,
        transformation: &Transformation,
    ) -> Result<Vec<u8>, BackendError> {
        let intermediate = tempfile::Builder::new()
            .prefix("iiif-render-")
            .suffix(".bmp")
            .tempfile()?;
        let (decode, post) = self.commands(source, transformation, intermediate.path())?;
        debug!(%decode, "decoding jpeg2000");
        self.raster.runner().execute(&decode)?;

        let decoded = source.derive(intermediate.path());
        self.raster.render(&decoded, &post)
    }
}
