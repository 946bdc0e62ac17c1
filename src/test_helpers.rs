//! Shared test utilities.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let path = write_png(tmp.path(), "world.png", 175, 131);
//! let request = params(&[("region", "square"), ("format", "png")]);
//! ```

use crate::transform::RenderParams;
use std::path::{Path, PathBuf};

/// Request parameters from `(key, value)` pairs.
pub fn params(pairs: &[(&str, &str)]) -> RenderParams {
    RenderParams::from_pairs(pairs.iter().copied())
}

/// Write a blank RGB PNG of the given size and return its path.
pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::new(width, height).save(&path).unwrap();
    path
}
