//! Size parameter: the output dimensions, independent of the region.
//!
//! Grammars, tried in order (first match wins):
//!
//! | Raw | Variant | Contract |
//! |---|---|---|
//! | absent, `full` | [`Size::Full`] | no resize |
//! | `,h` | [`Size::Absolute`] height only | width follows aspect |
//! | `w,` | [`Size::Absolute`] width only | height follows aspect |
//! | `pct:n` | [`Size::Percent`] | both axes scaled by `n`% |
//! | `w,h` | [`Size::Absolute`] both | exact, may distort |
//! | `!w,h` | [`Size::BestFit`] | fit inside `w x h`, keep aspect |

use super::{Field, ParamError};
use crate::types::ImageInformation;
use regex::{Captures, Regex};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Size {
    Full,
    /// At least one side is set; see [`Size::absolute`].
    Absolute {
        width: Option<u32>,
        height: Option<u32>,
    },
    Percent(f64),
    BestFit {
        width: u32,
        height: u32,
    },
}

type Rule = (Regex, fn(&Captures<'_>) -> Option<Size>);

fn rule(pattern: &str, build: fn(&Captures<'_>) -> Option<Size>) -> Rule {
    (Regex::new(pattern).expect("size pattern must compile"), build)
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"^full$", |_| Some(Size::Full)),
        rule(r"^,(\d+)$", |c| Some(Size::absolute(None, Some(c[1].parse().ok()?)))),
        rule(r"^(\d+),$", |c| Some(Size::absolute(Some(c[1].parse().ok()?), None))),
        rule(r"^pct:(\d+(?:\.\d+)?)$", |c| {
            let pct: f64 = c[1].parse().ok()?;
            (pct > 0.0).then_some(Size::Percent(pct))
        }),
        rule(r"^(\d+),(\d+)$", |c| {
            Some(Size::absolute(
                Some(c[1].parse().ok()?),
                Some(c[2].parse().ok()?),
            ))
        }),
        rule(r"^!(\d+),(\d+)$", |c| {
            Some(Size::BestFit {
                width: c[1].parse().ok()?,
                height: c[2].parse().ok()?,
            })
        }),
    ]
});

impl Size {
    /// Absolute size; with neither side given this is [`Size::Full`].
    pub fn absolute(width: Option<u32>, height: Option<u32>) -> Self {
        if width.is_none() && height.is_none() {
            Size::Full
        } else {
            Size::Absolute { width, height }
        }
    }

    /// Decode the raw `size` parameter.
    pub fn decode(raw: Option<&str>) -> Result<Self, ParamError> {
        let Some(raw) = raw else {
            return Ok(Size::Full);
        };
        RULES
            .iter()
            .find_map(|(pattern, build)| pattern.captures(raw).map(|c| build(&c)))
            .flatten()
            .ok_or_else(|| ParamError::invalid(Field::Size, raw))
    }

    /// Output dimensions when this size keeps the aspect ratio of `info`.
    ///
    /// Returns `None` for [`Size::Full`] and for an exact `w,h` that would
    /// distort the image; callers treat both as "nothing to reduce".
    pub fn aspect_preserving_target(&self, info: ImageInformation) -> Option<(f64, f64)> {
        let (src_w, src_h) = (info.width as f64, info.height as f64);
        match *self {
            Size::Full => None,
            Size::Absolute {
                width: Some(w),
                height: None,
            } => Some((w as f64, src_h * w as f64 / src_w)),
            Size::Absolute {
                width: None,
                height: Some(h),
            } => Some((src_w * h as f64 / src_h, h as f64)),
            Size::Absolute {
                width: Some(w),
                height: Some(h),
            } => {
                let keeps_aspect = (h as f64 * src_w / src_h).round() == w as f64
                    || (w as f64 * src_h / src_w).round() == h as f64;
                keeps_aspect.then_some((w as f64, h as f64))
            }
            Size::Absolute {
                width: None,
                height: None,
            } => None,
            Size::Percent(pct) => Some((src_w * pct / 100.0, src_h * pct / 100.0)),
            Size::BestFit { width, height } => {
                let scale = (width as f64 / src_w).min(height as f64 / src_h);
                Some((src_w * scale, src_h * scale))
            }
        }
    }

    /// The size to apply after the source was decoded at `1 / 2^factor` scale.
    ///
    /// Only percentages are relative to the input; every other size names
    /// absolute output pixels and is unchanged.
    pub fn reduce(&self, factor: u32) -> Size {
        match *self {
            Size::Percent(pct) => Size::Percent(pct * 2f64.powi(factor as i32)),
            other => other,
        }
    }
}
