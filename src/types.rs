//! Shared geometry types used by decoders, renderers and the façade.
//!
//! Both are plain `Copy` values: an [`ImageInformation`] is probed once per
//! source image and never mutated, and a [`CropBox`] is derived from it.

use serde::{Deserialize, Serialize};

/// Intrinsic pixel dimensions of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageInformation {
    pub width: u32,
    pub height: u32,
}

impl ImageInformation {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A pixel rectangle guaranteed to lie within the image it was resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropBox {
    /// Build a box clamped to `info`.
    ///
    /// Offsets past the edge collapse to the edge; the extent is cut so the
    /// box never reaches beyond `[0, width] x [0, height]`.
    pub fn clamped(x: u32, y: u32, width: u32, height: u32, info: ImageInformation) -> Self {
        let x = x.min(info.width);
        let y = y.min(info.height);
        Self {
            x,
            y,
            width: width.min(info.width - x),
            height: height.min(info.height - y),
        }
    }

    /// The whole image.
    pub fn full(info: ImageInformation) -> Self {
        Self {
            x: 0,
            y: 0,
            width: info.width,
            height: info.height,
        }
    }

    /// Dimensions of the cropped frame, as seen by later pipeline stages.
    pub fn dimensions(&self) -> ImageInformation {
        ImageInformation::new(self.width, self.height)
    }
}
