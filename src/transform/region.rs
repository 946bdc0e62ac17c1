//! Region parameter: which part of the source image to operate on.
//!
//! Grammars, tried in order (first match wins):
//!
//! | Raw | Variant |
//! |---|---|
//! | absent, `full` | [`Region::Full`] |
//! | `square` | [`Region::Square`] |
//! | `pct:x,y,w,h` | [`Region::Percentage`] |
//! | `x,y,w,h` | [`Region::Absolute`] |
//!
//! Parsing never touches the image. Square and percentage regions are turned
//! into pixels only when [`Region::resolve`] is handed an [`ImageInformation`].

use super::{Field, ParamError};
use crate::imaging::calculations::{percent_of, square_crop};
use crate::types::{CropBox, ImageInformation};
use regex::{Captures, Regex};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    Full,
    Square,
    Absolute {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// All four values are percentages of the source dimensions.
    Percentage {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

type Rule = (Regex, fn(&Captures<'_>) -> Option<Region>);

const NUMBER: &str = r"(\d+(?:\.\d+)?)";

fn rule(pattern: &str, build: fn(&Captures<'_>) -> Option<Region>) -> Rule {
    (Regex::new(pattern).expect("region pattern must compile"), build)
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"^full$", |_| Some(Region::Full)),
        rule(r"^square$", |_| Some(Region::Square)),
        rule(&format!("^pct:{NUMBER},{NUMBER},{NUMBER},{NUMBER}$"), |c| {
            Some(Region::Percentage {
                x: c[1].parse().ok()?,
                y: c[2].parse().ok()?,
                width: c[3].parse().ok()?,
                height: c[4].parse().ok()?,
            })
        }),
        rule(r"^(\d+),(\d+),(\d+),(\d+)$", |c| {
            Some(Region::Absolute {
                x: c[1].parse().ok()?,
                y: c[2].parse().ok()?,
                width: c[3].parse().ok()?,
                height: c[4].parse().ok()?,
            })
        }),
    ]
});

impl Region {
    /// Decode the raw `region` parameter.
    pub fn decode(raw: Option<&str>) -> Result<Self, ParamError> {
        let Some(raw) = raw else {
            return Ok(Region::Full);
        };
        RULES
            .iter()
            .find_map(|(pattern, build)| pattern.captures(raw).map(|c| build(&c)))
            .flatten()
            .ok_or_else(|| ParamError::invalid(Field::Region, raw))
    }

    /// Whether turning this region into pixels requires the source dimensions.
    pub fn needs_dimensions(&self) -> bool {
        matches!(self, Region::Square | Region::Percentage { .. })
    }

    /// Pixel box within `info` covered by this region.
    pub fn resolve(&self, info: ImageInformation) -> CropBox {
        match *self {
            Region::Full => CropBox::full(info),
            Region::Square => square_crop(info),
            Region::Absolute {
                x,
                y,
                width,
                height,
            } => CropBox::clamped(x, y, width, height, info),
            Region::Percentage {
                x,
                y,
                width,
                height,
            } => CropBox::clamped(
                percent_of(info.width, x),
                percent_of(info.height, y),
                percent_of(info.width, width),
                percent_of(info.height, height),
                info,
            ),
        }
    }
}
