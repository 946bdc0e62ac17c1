//! Dimension probing: the cheap "how big is it" question, without a render.
//!
//! Two methods are available:
//!
//! | Method | How |
//! |---|---|
//! | `identify` | `identify -format %hx%w <path>` through the [`CommandRunner`] |
//! | `native` | `image::image_dimensions` (header read, in-process) |
//!
//! [`SourceImage`] wraps a resolved file and probes it lazily, at most once,
//! only when a region or reduction calculation actually needs the numbers.

use super::backend::{BackendError, CommandRunner};
use super::params::ShellCommand;
use crate::types::ImageInformation;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, OnceLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    #[default]
    Identify,
    Native,
}

/// Reads source dimensions using the configured [`ProbeMethod`].
#[derive(Clone)]
pub struct Prober {
    method: ProbeMethod,
    identify: String,
    runner: Arc<dyn CommandRunner>,
}

impl Prober {
    pub fn new(
        method: ProbeMethod,
        identify: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            method,
            identify: identify.into(),
            runner,
        }
    }

    /// The `identify` invocation; prints `HEIGHTxWIDTH`.
    pub fn identify_command(&self, path: &Path) -> ShellCommand {
        ShellCommand::new(&self.identify)
            .args(["-format", "%hx%w"])
            .path_arg(path)
    }

    pub fn probe(&self, path: &Path) -> Result<ImageInformation, BackendError> {
        let info = match self.method {
            ProbeMethod::Identify => {
                let output = self.runner.execute(&self.identify_command(path))?;
                parse_identify_output(&output)?
            }
            ProbeMethod::Native => {
                let (width, height) = image::image_dimensions(path).map_err(|e| {
                    BackendError::ProcessingFailed(format!(
                        "Failed to read dimensions of {}: {e}",
                        path.display()
                    ))
                })?;
                ImageInformation::new(width, height)
            }
        };
        debug!(path = %path.display(), width = info.width, height = info.height, "probed");
        Ok(info)
    }
}

static IDENTIFY_OUTPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)x(\d+)").expect("identify pattern must compile"));

/// Parse `identify -format %hx%w` output. Height comes first.
///
/// Only the leading `HxW` pair is read; trailing output is ignored.
pub fn parse_identify_output(output: &[u8]) -> Result<ImageInformation, BackendError> {
    let text = String::from_utf8_lossy(output);
    let invalid =
        || BackendError::ProcessingFailed(format!("Unexpected identify output: {text:?}"));
    let caps = IDENTIFY_OUTPUT.captures(&text).ok_or_else(invalid)?;
    let height: u32 = caps[1].parse().map_err(|_| invalid())?;
    let width: u32 = caps[2].parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok(ImageInformation::new(width, height))
}

/// A resolved source file with lazily probed dimensions.
pub struct SourceImage<'a> {
    path: PathBuf,
    prober: &'a Prober,
    info: OnceLock<ImageInformation>,
}

impl<'a> SourceImage<'a> {
    pub fn new(path: impl Into<PathBuf>, prober: &'a Prober) -> Self {
        Self {
            path: path.into(),
            prober,
            info: OnceLock::new(),
        }
    }

    /// A source whose dimensions are already known; never probed.
    pub fn with_info(
        path: impl Into<PathBuf>,
        prober: &'a Prober,
        info: ImageInformation,
    ) -> Self {
        let source = Self::new(path, prober);
        let _ = source.info.set(info);
        source
    }

    /// Another file read with the same prober, e.g. a decoded intermediate.
    pub fn derive(&self, path: impl Into<PathBuf>) -> SourceImage<'a> {
        SourceImage::new(path, self.prober)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> Result<ImageInformation, BackendError> {
        if let Some(info) = self.info.get() {
            return Ok(*info);
        }
        let info = self.prober.probe(&self.path)?;
        Ok(*self.info.get_or_init(|| info))
    }
}
