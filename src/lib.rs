//! # iiif-render
//!
//! The request-transformation core of an IIIF Image API server: it turns the
//! `region/size/rotation/quality.format` parameters of an image request into
//! invocations of external image tools, runs them, and caches the bytes.
//!
//! # Architecture: Decode → Plan → Render
//!
//! ```text
//! 1. Decode   raw params      →  Transformation     (pure, eager validation)
//! 2. Plan     Transformation  →  ShellCommand(s)    (pure, may probe dimensions)
//! 3. Render   ShellCommand(s) →  bytes              (external tools, cached)
//! ```
//!
//! Decoding never touches the source image, so malformed requests are
//! rejected before any IO. Planning is side-effect free apart from an
//! optional dimension probe, which is why the `plan` command can show
//! exactly what a render would run. Only the [`imaging::CommandRunner`]
//! spawns processes.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`transform`] | Region, size, quality, rotation and format grammars → [`transform::Transformation`] |
//! | [`imaging`] | Dimension probe, reduction factor math, `convert` and `kdu_expand` command factories, renderers |
//! | [`resolver`] | Identifier → local source file (filesystem or HTTP download) |
//! | [`cache`] | Request cache keys, memory/disk/null backends, hit statistics |
//! | [`image`] | The façade: `ImageService` and per-source `Image` (render, info, plan) |
//! | [`warm`] | Parallel batch rendering to pre-fill the cache |
//! | [`config`] | `iiif-render.toml` loading, validation and defaults |
//! | [`types`] | Shared geometry types (`ImageInformation`, `CropBox`) |
//!
//! # Design Decisions
//!
//! ## Grammars as Sum Types
//!
//! [`transform::Region`] and [`transform::Size`] are enums, and every
//! consumer matches on them exhaustively. A new grammar is a compile error
//! in each command factory until it is handled. Parsing is an ordered table
//! of regex rules where the first match wins, so ambiguous input always
//! resolves the same way.
//!
//! ## External Tools Behind a Trait
//!
//! Rendering shells out to ImageMagick and, for JPEG2000, Kakadu. Command
//! construction is pure and returns a [`imaging::ShellCommand`]; execution
//! goes through [`imaging::CommandRunner`]. Tests swap in a recording mock
//! and assert on exact command lines.
//!
//! ## JPEG2000 Reduction
//!
//! A JPEG2000 file stores power-of-two resolution levels. When the requested
//! size allows it, `kdu_expand` decodes a smaller level (`-reduce r`) and the
//! raster pipeline finishes the job. The level is chosen so the decoded
//! frame never falls below the requested size.
//!
//! ## Explicit Configuration
//!
//! There is no process-wide mutable state. The resolver, cache, tools and
//! format allow-list are carried by an [`image::ImageService`] built from a
//! [`config::Config`].

pub mod cache;
pub mod config;
pub mod image;
pub mod imaging;
pub mod resolver;
pub mod transform;
pub mod types;
pub mod warm;

#[cfg(test)]
pub(crate) mod test_helpers;
