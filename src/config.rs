//! Service configuration module.
//!
//! Handles loading, validating, and merging `iiif-render.toml` files. Stock
//! defaults are serialized to a TOML table and the user's file is merged on
//! top, so a config file only needs the keys it wants to change.
//!
//! The resulting [`Config`] is an explicit value handed to
//! [`ImageService::from_config`](crate::image::ImageService::from_config);
//! nothing in the crate reads process-wide settings.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [cache]
//! enabled = true
//! backend = "disk"                # "disk" or "memory"
//! directory = ".iiif-cache"
//! duration_days = 3
//!
//! [resolver]
//! kind = "filesystem"             # "filesystem" or "http"
//! base_paths = ["images"]
//! extensions = ["png", "jpg", "tiff", "jp", "jp2"]
//! url_template = "https://example.org/images/{id}.jpg"
//! download_dir = ".iiif-downloads"
//!
//! [renderer]
//! backend = "imagemagick"         # "imagemagick" or "kakadu"
//! convert = "convert"
//! identify = "identify"
//! kdu_expand = "kdu_expand"
//! threads = 4
//! max_reduction = 5
//! probe = "identify"              # "identify" or "native"
//!
//! [output]
//! formats = ["jpg", "png"]
//!
//! [processing]
//! max_processes = 4               # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::ProbeMethod;
use crate::imaging::calculations::MAX_REDUCTION;
use crate::transform::Format;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILENAME: &str = "iiif-render.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration loaded from `iiif-render.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Rendered-output cache.
    pub cache: CacheConfig,
    /// Where source images come from.
    pub resolver: ResolverConfig,
    /// External tools and their tuning.
    pub renderer: RendererConfig,
    /// Output format allow-list.
    pub output: OutputConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl Config {
    /// Validate values that parse fine but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.renderer.threads == 0 {
            return Err(ConfigError::Validation(
                "renderer.threads must be at least 1".into(),
            ));
        }
        if self.renderer.max_reduction > MAX_REDUCTION {
            return Err(ConfigError::Validation(format!(
                "renderer.max_reduction must be at most {MAX_REDUCTION}"
            )));
        }
        if self.output.formats.is_empty() {
            return Err(ConfigError::Validation(
                "output.formats must not be empty".into(),
            ));
        }
        if let Some(bad) = self
            .output
            .formats
            .iter()
            .find(|f| f.parse::<Format>().is_err())
        {
            return Err(ConfigError::Validation(format!(
                "output.formats: unknown format '{bad}'"
            )));
        }
        match self.resolver.kind {
            ResolverKind::Http if !self.resolver.url_template.contains("{id}") => {
                Err(ConfigError::Validation(
                    "resolver.url_template must contain {id}".into(),
                ))
            }
            ResolverKind::Filesystem if self.resolver.base_paths.is_empty() => Err(
                ConfigError::Validation("resolver.base_paths must not be empty".into()),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Disk,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// When false, every request renders (same as `--no-cache`).
    pub enabled: bool,
    pub backend: CacheBackend,
    /// Root of the disk cache.
    pub directory: PathBuf,
    /// Entries older than this are re-rendered.
    pub duration_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Disk,
            directory: PathBuf::from(".iiif-cache"),
            duration_days: 3,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.duration_days.saturating_mul(24 * 60 * 60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    #[default]
    Filesystem,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    pub kind: ResolverKind,
    /// Directories searched for `<id>.<ext>` (filesystem).
    pub base_paths: Vec<PathBuf>,
    /// Extensions tried in order (filesystem).
    pub extensions: Vec<String>,
    /// Source URL with an `{id}` placeholder (http).
    pub url_template: String,
    /// Where downloaded sources are kept (http).
    pub download_dir: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            kind: ResolverKind::Filesystem,
            base_paths: vec![PathBuf::from("images")],
            extensions: ["png", "jpg", "tiff", "jp", "jp2"]
                .map(String::from)
                .to_vec(),
            url_template: "https://example.org/images/{id}.jpg".into(),
            download_dir: PathBuf::from(".iiif-downloads"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererBackend {
    #[default]
    ImageMagick,
    Kakadu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// `kakadu` decodes `.jp2` sources with `kdu_expand`; everything else
    /// always goes through `convert`.
    pub backend: RendererBackend,
    pub convert: String,
    pub identify: String,
    pub kdu_expand: String,
    /// Thread hint passed to `kdu_expand`.
    pub threads: u32,
    /// Highest JPEG2000 resolution level to decode from.
    pub max_reduction: u32,
    pub probe: ProbeMethod,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: RendererBackend::ImageMagick,
            convert: "convert".into(),
            identify: "identify".into(),
            kdu_expand: "kdu_expand".into(),
            threads: 4,
            max_reduction: 5,
            probe: ProbeMethod::Identify,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Formats a request may ask for. Names are checked by
    /// [`Config::validate`].
    pub formats: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            formats: vec!["jpg".into(), "png".into()],
        }
    }
}

impl OutputConfig {
    /// The allow-list as [`Format`]s. Unknown names are skipped.
    pub fn allowed_formats(&self) -> Vec<Format> {
        self.formats.iter().filter_map(|f| f.parse().ok()).collect()
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel render workers for `warm`.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Config::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
pub fn load_raw_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<Config, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `iiif-render.toml` from `dir`, falling back to the stock defaults
/// when the file does not exist.
pub fn load_config(dir: &Path) -> Result<Config, ConfigError> {
    let path = dir.join(CONFIG_FILENAME);
    let overlay = if path.exists() {
        Some(load_raw_config(&path)?)
    } else {
        None
    };
    resolve_config(overlay)
}

/// Load an explicitly named config file; a missing file is an error.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    resolve_config(Some(load_raw_config(path)?))
}

/// Returns a fully-commented stock `iiif-render.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# iiif-render Configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Rendered-output cache
# ---------------------------------------------------------------------------
[cache]
# Set to false to render every request (same as --no-cache).
enabled = true

# "disk" keeps entries across runs, "memory" only for one process.
backend = "disk"

# Root directory of the disk cache.
directory = ".iiif-cache"

# Entries older than this many days are rendered again.
duration_days = 3

# ---------------------------------------------------------------------------
# Source lookup
# ---------------------------------------------------------------------------
[resolver]
# "filesystem" searches local directories, "http" downloads by URL.
kind = "filesystem"

# Directories searched for <id>.<extension>, in order.
base_paths = ["images"]

# Extensions tried for each directory, in order.
extensions = ["png", "jpg", "tiff", "jp", "jp2"]

# Source URL for the http resolver; {id} is replaced by the identifier.
url_template = "https://example.org/images/{id}.jpg"

# Where the http resolver keeps downloaded sources.
download_dir = ".iiif-downloads"

# ---------------------------------------------------------------------------
# External tools
# ---------------------------------------------------------------------------
[renderer]
# "imagemagick" renders everything with convert.
# "kakadu" decodes .jp2 sources with kdu_expand first, at a reduced
# resolution when the requested size allows it.
backend = "imagemagick"

convert = "convert"
identify = "identify"
kdu_expand = "kdu_expand"

# Thread count passed to kdu_expand.
threads = 4

# Highest JPEG2000 resolution level (power of two) to decode from.
max_reduction = 5

# How source dimensions are read: "identify" (ImageMagick) or "native"
# (in-process header read, no external tool).
probe = "identify"

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Formats a request may ask for. Known: jpg, png, gif, tif, webp.
formats = ["jpg", "png"]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel render workers for `warm`.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
