//! Scalar request parameters: quality, rotation and output format.
//!
//! Unlike region and size these never depend on the source image, so each
//! decodes straight to a value.

use super::{Field, ParamError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Requested colour treatment.
///
/// `Default` and `Color` leave pixels untouched; the raster pipeline skips
/// the colourspace stage entirely for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    Default,
    Color,
    Grey,
    Bitonal,
}

impl Quality {
    /// Decode the raw `quality` parameter. Absent means [`Quality::Default`].
    pub fn decode(raw: Option<&str>) -> Result<Self, ParamError> {
        match raw {
            None | Some("default") => Ok(Quality::Default),
            Some("color") => Ok(Quality::Color),
            Some("grey") => Ok(Quality::Grey),
            Some("bitonal") => Ok(Quality::Bitonal),
            Some(other) => Err(ParamError::invalid(Field::Quality, other)),
        }
    }

    /// True when the quality requires no colourspace work.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Quality::Default | Quality::Color)
    }
}

/// Clockwise rotation in degrees.
///
/// Exactly zero is the identity; renderers must not emit any rotation stage
/// for it (the background fill would still alter the output).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rotation(f64);

impl Rotation {
    pub const NONE: Rotation = Rotation(0.0);

    pub fn degrees(&self) -> f64 {
        self.0
    }

    pub fn is_identity(&self) -> bool {
        self.0 == 0.0
    }

    /// Decode the raw `rotation` parameter.
    pub fn decode(raw: Option<&str>) -> Result<Self, ParamError> {
        let raw = match raw {
            None | Some("0") => return Ok(Rotation::NONE),
            Some(raw) => raw,
        };
        match parse_degrees(raw) {
            Some(degrees) if degrees.is_finite() => Ok(Rotation(degrees)),
            _ => Err(ParamError::invalid(Field::Rotation, raw)),
        }
    }
}

/// Float grammar for rotations: surrounding whitespace is ignored and an
/// underscore may separate two digits (`1_000`).
fn parse_degrees(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();
    let separators_ok = bytes.iter().enumerate().all(|(i, &b)| {
        b != b'_'
            || (i > 0
                && bytes[i - 1].is_ascii_digit()
                && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
    });
    if !separators_ok {
        return None;
    }
    trimmed.replace('_', "").parse().ok()
}

/// Output container format.
///
/// This is every format the raster tool is known to write; which of them a
/// service actually serves is decided by the configured allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpg,
    Png,
    Gif,
    Tif,
    Webp,
}

impl Format {
    pub const ALL: [Format; 5] = [
        Format::Jpg,
        Format::Png,
        Format::Gif,
        Format::Tif,
        Format::Webp,
    ];

    /// Extension used both in request URLs and as the raster tool's output coder.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Jpg => "jpg",
            Format::Png => "png",
            Format::Gif => "gif",
            Format::Tif => "tif",
            Format::Webp => "webp",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Jpg => "image/jpeg",
            Format::Png => "image/png",
            Format::Gif => "image/gif",
            Format::Tif => "image/tiff",
            Format::Webp => "image/webp",
        }
    }

    /// Decode a format value against an allow-list.
    ///
    /// Unknown formats and known-but-disallowed formats fail identically.
    pub fn decode(raw: &str, allowed: &[Format]) -> Result<Self, ParamError> {
        raw.parse::<Format>()
            .ok()
            .filter(|format| allowed.contains(format))
            .ok_or_else(|| ParamError::invalid(Field::Format, raw))
    }
}

impl FromStr for Format {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::ALL
            .into_iter()
            .find(|f| f.extension() == s)
            .ok_or_else(|| ParamError::invalid(Field::Format, s))
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
