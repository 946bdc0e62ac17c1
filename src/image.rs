//! Image façade: the entry point for rendering and inspecting one source.
//!
//! An [`ImageService`] owns the collaborators (resolver, cache, prober,
//! renderers, authorization) and is built once, either explicitly or from a
//! [`Config`]. [`ImageService::image`] hands out cheap per-identifier
//! [`Image`] handles.
//!
//! ## Render flow
//!
//! ```text
//! decode params ─► authorize ─► cache key ─► cache hit? ──yes──► bytes
//!                                               │ no
//!                                               ▼
//!                               resolve file ─► pick renderer ─► run ─► store ─► bytes
//! ```
//!
//! Decoding happens before anything else, so malformed requests fail without
//! touching the cache, the resolver or any external tool. A cache hit never
//! resolves the source.

use crate::cache::{self, CacheStats, DiskCache, MemoryCache, NullCache, RenderCache};
use crate::config::{CacheBackend, Config, RendererBackend, ResolverKind};
use crate::imaging::{
    BackendError, CommandRunner, ImageMagickRenderer, KakaduRenderer, Prober, Renderers,
    ShellCommand, SourceImage,
};
use crate::resolver::{FileResolver, FileSystemResolver, HttpResolver, ResolverError};
use crate::transform::{Format, ParamError, RenderParams, Transformation};
use crate::types::ImageInformation;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error("Not authorized to access '{id}'")]
    Unauthorized { id: String },
    #[error("Source not found: {0}")]
    SourceNotFound(#[from] ResolverError),
    #[error("Render failed: {0}")]
    RenderFailure(#[from] BackendError),
}

impl RenderError {
    /// Bad input from the caller; retrying the same request cannot succeed.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, RenderError::Params(_) | RenderError::Unauthorized { .. })
    }

    /// Failures that may be transient (storage or tool availability).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RenderError::SourceNotFound(_) | RenderError::RenderFailure(_)
        )
    }
}

/// Access policy consulted before any work is done for a request.
pub trait AuthorizationService: Send + Sync {
    fn can_render(&self, id: &str, params: &RenderParams) -> bool;
    fn can_read_info(&self, id: &str) -> bool;
}

/// Permits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AuthorizationService for AllowAll {
    fn can_render(&self, _id: &str, _params: &RenderParams) -> bool {
        true
    }

    fn can_read_info(&self, _id: &str) -> bool {
        true
    }
}

pub struct ImageService {
    resolver: Box<dyn FileResolver>,
    cache: Box<dyn RenderCache>,
    prober: Prober,
    renderers: Renderers,
    authorization: Box<dyn AuthorizationService>,
    formats: Vec<Format>,
    ttl: Duration,
    stats: CacheStats,
}

impl ImageService {
    /// A service with the default allow-list (`jpg`, `png`), a three day
    /// TTL and no access control.
    pub fn new(
        resolver: Box<dyn FileResolver>,
        cache: Box<dyn RenderCache>,
        prober: Prober,
        renderers: Renderers,
    ) -> Self {
        Self {
            resolver,
            cache,
            prober,
            renderers,
            authorization: Box::new(AllowAll),
            formats: vec![Format::Jpg, Format::Png],
            ttl: Duration::from_secs(3 * 24 * 60 * 60),
            stats: CacheStats::default(),
        }
    }

    /// Wire up every collaborator from configuration.
    ///
    /// `use_cache = false` swaps in the null cache regardless of config.
    pub fn from_config(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        use_cache: bool,
    ) -> Result<Self, ResolverError> {
        let resolver: Box<dyn FileResolver> = match config.resolver.kind {
            ResolverKind::Filesystem => Box::new(FileSystemResolver::new(
                config.resolver.base_paths.clone(),
                config.resolver.extensions.clone(),
            )),
            ResolverKind::Http => Box::new(HttpResolver::new(
                config.resolver.url_template.clone(),
                config.resolver.download_dir.clone(),
            )?),
        };

        let cache: Box<dyn RenderCache> = if !(use_cache && config.cache.enabled) {
            Box::new(NullCache)
        } else {
            match config.cache.backend {
                CacheBackend::Memory => Box::new(MemoryCache::new()),
                CacheBackend::Disk => Box::new(DiskCache::new(config.cache.directory.clone())),
            }
        };

        let r = &config.renderer;
        let prober = Prober::new(r.probe, r.identify.clone(), runner.clone());
        let renderers = Renderers {
            raster: ImageMagickRenderer::new(r.convert.clone(), runner.clone()),
            jpeg2000: (r.backend == RendererBackend::Kakadu).then(|| {
                KakaduRenderer::new(
                    r.kdu_expand.clone(),
                    r.threads,
                    r.max_reduction,
                    ImageMagickRenderer::new(r.convert.clone(), runner),
                )
            }),
        };

        Ok(Self::new(resolver, cache, prober, renderers)
            .with_formats(config.output.allowed_formats())
            .with_ttl(config.cache.ttl()))
    }

    pub fn with_formats(mut self, formats: Vec<Format>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_authorization(mut self, authorization: Box<dyn AuthorizationService>) -> Self {
        self.authorization = authorization;
        self
    }

    /// Handle for the source named `id`; nothing is resolved yet.
    pub fn image(&self, id: impl Into<String>) -> Image<'_> {
        Image {
            service: self,
            id: id.into(),
            file: None,
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn formats(&self) -> &[Format] {
        &self.formats
    }
}

/// One source image as seen through an [`ImageService`].
pub struct Image<'s> {
    service: &'s ImageService,
    id: String,
    file: Option<PathBuf>,
}

impl<'s> Image<'s> {
    /// Use `path` as the source instead of asking the resolver.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn source_path(&self) -> Result<PathBuf, ResolverError> {
        match &self.file {
            Some(path) => Ok(path.clone()),
            None => self.service.resolver.find(&self.id),
        }
    }

    fn decode(&self, params: &RenderParams) -> Result<Transformation, RenderError> {
        let transformation = Transformation::decode(params, &self.service.formats)?;
        if !self.service.authorization.can_render(&self.id, params) {
            return Err(RenderError::Unauthorized {
                id: self.id.clone(),
            });
        }
        Ok(transformation)
    }

    /// Render the request, serving it from the cache when possible.
    pub fn render(&self, params: &RenderParams) -> Result<Vec<u8>, RenderError> {
        let transformation = self.decode(params)?;
        let service = self.service;
        let key = cache::cache_key(&self.id, params);
        cache::fetch(service.cache.as_ref(), &key, service.ttl, &service.stats, || {
            let path = self.source_path()?;
            debug!(id = %self.id, path = %path.display(), "rendering");
            let source = SourceImage::new(path, &service.prober);
            let renderer = service.renderers.for_source(source.path());
            Ok(renderer.render(&source, &transformation)?)
        })
    }

    /// The command lines a render of `params` would run.
    ///
    /// Nothing is rendered, but the source is resolved and may be probed.
    pub fn plan(&self, params: &RenderParams) -> Result<Vec<ShellCommand>, RenderError> {
        let transformation = self.decode(params)?;
        let source = SourceImage::new(self.source_path()?, &self.service.prober);
        let renderer = self.service.renderers.for_source(source.path());
        Ok(renderer.plan(&source, &transformation)?)
    }

    /// Source dimensions, from a probe rather than a render.
    pub fn info(&self) -> Result<ImageInformation, RenderError> {
        if !self.service.authorization.can_read_info(&self.id) {
            return Err(RenderError::Unauthorized {
                id: self.id.clone(),
            });
        }
        let path = self.source_path()?;
        Ok(self.service.prober.probe(&path)?)
    }
}
