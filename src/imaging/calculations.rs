//! Pure calculation functions for request geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use crate::types::{CropBox, ImageInformation};

/// Pixel value of `pct` percent of `dim`, rounded half away from zero.
///
/// # Examples
/// ```
/// # use iiif_render::imaging::calculations::percent_of;
/// assert_eq!(percent_of(175, 10.0), 18); // 17.5 rounds up
/// assert_eq!(percent_of(131, 10.0), 13);
/// ```
pub fn percent_of(dim: u32, pct: f64) -> u32 {
    (dim as f64 * pct / 100.0).round() as u32
}

/// Largest centred square that fits in the image.
///
/// The side is the shorter edge; the offset along the longer edge is
/// `(longer - shorter) / 2`, truncated.
pub fn square_crop(info: ImageInformation) -> CropBox {
    let side = info.width.min(info.height);
    let offset = (info.width.max(info.height) - side) / 2;
    if info.height >= info.width {
        CropBox {
            x: 0,
            y: offset,
            width: side,
            height: side,
        }
    } else {
        CropBox {
            x: offset,
            y: 0,
            width: side,
            height: side,
        }
    }
}

/// Deepest decode level a `max_factor` may ask for.
pub const MAX_REDUCTION: u32 = 31;

/// Pick the power-of-two decode level for a multi-resolution source.
///
/// Returns the largest `r` such that decoding `source` at `1 / 2^r` scale is
/// still at least `target` on both axes, capped at `max_factor`. A result of
/// zero (target too close to the source, or larger than it) is reported as
/// `None`: decode at full resolution.
///
/// # Arguments
/// * `source` - Dimensions of the frame being decoded
/// * `target` - Requested output `(width, height)`; fractional values allowed
/// * `max_factor` - Deepest resolution level the decoder may use
pub fn reduction_factor(
    source: ImageInformation,
    target: (f64, f64),
    max_factor: u32,
) -> Option<u32> {
    let (target_w, target_h) = target;
    if target_w <= 0.0 || target_h <= 0.0 {
        return None;
    }
    let (src_w, src_h) = (source.width as f64, source.height as f64);
    let ratio = (src_w / target_w).min(src_h / target_h);
    if ratio < 2.0 {
        return None;
    }

    let mut factor = (ratio.log2().floor() as u32).min(max_factor.min(MAX_REDUCTION));
    // log2 can land a hair above an exact power of two; verify and back off
    while factor > 0 {
        let scale = 2f64.powi(factor as i32);
        if src_w / scale >= target_w && src_h / scale >= target_h {
            break;
        }
        factor -= 1;
    }
    (factor > 0).then_some(factor)
}

/// A crop box expressed as `[0, 1]` fractions of the source dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FractionalRegion {
    pub top: f64,
    pub left: f64,
    pub height: f64,
    pub width: f64,
}

/// Divide a pixel crop box by the source dimensions, without rounding.
pub fn fractional_region(crop: CropBox, source: ImageInformation) -> FractionalRegion {
    let (w, h) = (source.width as f64, source.height as f64);
    FractionalRegion {
        top: crop.y as f64 / h,
        left: crop.x as f64 / w,
        height: crop.height as f64 / h,
        width: crop.width as f64 / w,
    }
}
