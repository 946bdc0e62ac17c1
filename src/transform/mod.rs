//! Request decoding: raw IIIF parameters → [`Transformation`].
//!
//! Decoding is eager and pure. Every parameter is validated before anything
//! touches the source image, and the first failure wins, in this order:
//!
//! 1. format present (else [`ParamError::MissingFormat`])
//! 2. region
//! 3. size
//! 4. quality
//! 5. rotation
//! 6. format in the allow-list
//!
//! Checking format presence first means a request without a format always
//! reports the same error no matter what else is malformed.

pub mod params;
pub mod region;
pub mod size;

pub use params::{Format, Quality, Rotation};
pub use region::Region;
pub use size::Size;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The parameter a validation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Region,
    Size,
    Quality,
    Rotation,
    Format,
}

impl Field {
    fn message_prefix(&self) -> &'static str {
        match self {
            Field::Region => "Invalid region",
            Field::Size => "Invalid size",
            Field::Quality => "Unsupported quality",
            Field::Rotation => "Unsupported rotation",
            Field::Format => "Unsupported format",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Region => "region",
            Field::Size => "size",
            Field::Quality => "quality",
            Field::Rotation => "rotation",
            Field::Format => "format",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("You must provide a format")]
    MissingFormat,
    #[error("{}: {value}", .field.message_prefix())]
    InvalidAttribute { field: Field, value: String },
}

impl ParamError {
    pub(crate) fn invalid(field: Field, value: &str) -> Self {
        ParamError::InvalidAttribute {
            field,
            value: value.to_string(),
        }
    }
}

/// Raw request parameters as they arrive from a caller.
///
/// Keys are matched case-insensitively by [`RenderParams::from_pairs`];
/// unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    pub region: Option<String>,
    pub size: Option<String>,
    pub rotation: Option<String>,
    pub quality: Option<String>,
    pub format: Option<String>,
}

impl RenderParams {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = RenderParams::default();
        for (key, value) in pairs {
            let slot = match key.as_ref().to_ascii_lowercase().as_str() {
                "region" => &mut params.region,
                "size" => &mut params.size,
                "rotation" => &mut params.rotation,
                "quality" => &mut params.quality,
                "format" => &mut params.format,
                _ => continue,
            };
            *slot = Some(value.into());
        }
        params
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// A fully decoded request; the sole input to every command factory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transformation {
    pub region: Region,
    pub size: Size,
    pub quality: Quality,
    pub rotation: Rotation,
    pub format: Format,
}

impl Transformation {
    /// Decode and validate raw parameters against the allowed output formats.
    pub fn decode(params: &RenderParams, formats: &[Format]) -> Result<Self, ParamError> {
        let raw_format = params.format.as_deref().ok_or(ParamError::MissingFormat)?;
        let region = Region::decode(params.region.as_deref())?;
        let size = Size::decode(params.size.as_deref())?;
        let quality = Quality::decode(params.quality.as_deref())?;
        let rotation = Rotation::decode(params.rotation.as_deref())?;
        let format = Format::decode(raw_format, formats)?;
        Ok(Self {
            region,
            size,
            quality,
            rotation,
            format,
        })
    }

    /// Same transformation applied to an already-cropped intermediate.
    pub fn without_crop(&self) -> Self {
        Self {
            region: Region::Full,
            ..*self
        }
    }

    pub fn with_size(&self, size: Size) -> Self {
        Self { size, ..*self }
    }
}
