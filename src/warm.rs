//! Cache warming: render a batch of requests ahead of traffic.
//!
//! Requests are read from a JSON array of objects with an `id` plus the
//! usual request parameters:
//!
//! ```json
//! [
//!   {"id": "world", "size": "!150,75", "format": "jpg"},
//!   {"id": "world", "region": "square", "size": "100,", "format": "png"}
//! ]
//! ```
//!
//! Requests render in parallel on the global rayon pool (sized by
//! `[processing] max_processes`). Renders are independent; a failed request
//! is reported and does not stop the batch.

use crate::image::{ImageService, RenderError};
use crate::transform::RenderParams;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum WarmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid request list: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawWarmRequest")]
pub struct WarmRequest {
    pub id: String,
    #[serde(flatten)]
    pub params: RenderParams,
}

/// Parameter keys as written in the file; matched case-insensitively.
#[derive(Deserialize)]
struct RawWarmRequest {
    id: String,
    #[serde(flatten)]
    params: BTreeMap<String, String>,
}

impl From<RawWarmRequest> for WarmRequest {
    fn from(raw: RawWarmRequest) -> Self {
        Self {
            id: raw.id,
            params: RenderParams::from_pairs(raw.params),
        }
    }
}

/// Result of one warm request. `Ok` carries the rendered size in bytes.
#[derive(Debug)]
pub struct WarmOutcome {
    pub request: WarmRequest,
    pub result: Result<usize, RenderError>,
}

pub fn load_requests(path: &Path) -> Result<Vec<WarmRequest>, WarmError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Render every request, returning outcomes in input order.
pub fn warm(service: &ImageService, requests: Vec<WarmRequest>) -> Vec<WarmOutcome> {
    requests
        .into_par_iter()
        .map(|request| {
            let result = service
                .image(request.id.as_str())
                .render(&request.params)
                .map(|bytes| bytes.len());
            if let Err(e) = &result {
                warn!(id = %request.id, error = %e, "warm request failed");
            }
            WarmOutcome { request, result }
        })
        .collect()
}

/// One display line per outcome.
pub fn format_outcome(outcome: &WarmOutcome) -> String {
    let p = &outcome.request.params;
    let describe = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
    let label = format!(
        "{} region={} size={} rotation={} quality={} format={}",
        outcome.request.id,
        describe(&p.region),
        describe(&p.size),
        describe(&p.rotation),
        describe(&p.quality),
        describe(&p.format),
    );
    match &outcome.result {
        Ok(len) => format!("    {label}: {len} bytes"),
        Err(e) => format!("    {label}: FAILED ({e})"),
    }
}
