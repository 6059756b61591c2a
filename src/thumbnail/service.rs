//! Request orchestration.
//!
//! ```text
//! RemoteSource ─► SlideSource::open ─► BlockCache ─► DirectoryParser ─┬─► metadata::extract
//!                                                   (DirectoryCache)  └─► select ─► fetch_page
//!                                                                                     │
//!                                                         spawn_blocking: decode ─► render PNG
//! ```
//!
//! Every request gets its own reader and block cache. Only parsed
//! directories are shared between requests.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use super::cache::{DirectoryCache, DirectoryKey};
use super::render::{fit_within, render};
use crate::decode::{fetch_page, DecodeOptions};
use crate::error::{RenderError, ThumbnailError};
use crate::format::tiff::{DirectoryIndex, DirectoryParser};
use crate::format::{extract, select, SlideMetadata, ThumbnailCandidate};
use crate::io::{BlockCache, RangeReader, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::source::{RemoteSource, SlideSource};

/// Default budget for one whole request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default longest thumbnail side.
pub const DEFAULT_MAX_DIMENSION: u32 = 512;

/// Tuning knobs of a [`ThumbnailService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: Duration,
    pub block_size: usize,
    pub block_capacity: usize,
    pub parser: DirectoryParser,
    pub decode: DecodeOptions,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            block_size: DEFAULT_BLOCK_SIZE,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            parser: DirectoryParser::default(),
            decode: DecodeOptions::default(),
        }
    }
}

/// How much of the object a request read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub bytes_fetched: u64,
    pub requests: u64,
    pub file_size: u64,
}

impl FetchStats {
    fn of<R: RangeReader>(reader: &BlockCache<R>) -> Self {
        Self {
            bytes_fetched: reader.bytes_fetched(),
            requests: reader.request_count(),
            file_size: reader.inner().size(),
        }
    }

    /// Fraction of the object that was fetched.
    pub fn fraction(&self) -> f64 {
        if self.file_size == 0 {
            0.0
        } else {
            self.bytes_fetched as f64 / self.file_size as f64
        }
    }
}

/// A rendered thumbnail.
#[derive(Debug, Clone)]
pub struct ThumbnailOutput {
    pub png: Bytes,
    pub width: u32,
    pub height: u32,
    pub candidate: ThumbnailCandidate,
    pub stats: FetchStats,
}

/// Metadata and thumbnail from one parsing session.
#[derive(Debug, Clone)]
pub struct SlideReport {
    pub metadata: SlideMetadata,
    pub thumbnail: ThumbnailOutput,
}

/// Metadata and thumbnail extraction over a [`SlideSource`].
pub struct ThumbnailService<S: SlideSource> {
    source: S,
    directories: DirectoryCache,
    config: ServiceConfig,
}

impl<S: SlideSource> ThumbnailService<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, ServiceConfig::default(), DirectoryCache::new())
    }

    pub fn with_config(source: S, config: ServiceConfig, directories: DirectoryCache) -> Self {
        Self {
            source,
            directories,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn directory_cache(&self) -> &DirectoryCache {
        &self.directories
    }

    /// Extract slide metadata. Reads only the directory chain.
    pub async fn metadata(&self, source: &RemoteSource) -> Result<SlideMetadata, ThumbnailError> {
        self.with_timeout(async {
            let (reader, index) = self.open(source).await?;
            let metadata = extract(&index);
            info!(
                "Metadata for {}: {}x{} vendor={}, fetched {} of {} bytes",
                source.cache_identity(),
                metadata.width,
                metadata.height,
                metadata.vendor,
                reader.bytes_fetched(),
                reader.size()
            );
            Ok(metadata)
        })
        .await
    }

    /// Render a thumbnail whose longest side is at most `max_dimension`.
    pub async fn thumbnail(
        &self,
        source: &RemoteSource,
        max_dimension: u32,
    ) -> Result<ThumbnailOutput, ThumbnailError> {
        check_dimension(max_dimension)?;
        self.with_timeout(async {
            let (reader, index) = self.open(source).await?;
            self.render_thumbnail(source, &reader, &index, max_dimension).await
        })
        .await
    }

    /// Metadata and thumbnail sharing one directory parse.
    pub async fn process(
        &self,
        source: &RemoteSource,
        max_dimension: u32,
    ) -> Result<SlideReport, ThumbnailError> {
        check_dimension(max_dimension)?;
        self.with_timeout(async {
            let (reader, index) = self.open(source).await?;
            let metadata = extract(&index);
            let thumbnail = self
                .render_thumbnail(source, &reader, &index, max_dimension)
                .await?;
            Ok(SlideReport {
                metadata,
                thumbnail,
            })
        })
        .await
    }

    async fn with_timeout<T, F>(&self, request: F) -> Result<T, ThumbnailError>
    where
        F: std::future::Future<Output = Result<T, ThumbnailError>>,
    {
        tokio::time::timeout(self.config.timeout, request)
            .await
            .map_err(|_| ThumbnailError::Timeout(self.config.timeout))?
    }

    /// Open a reader and get the directory index, from cache when possible.
    async fn open(
        &self,
        source: &RemoteSource,
    ) -> Result<(BlockCache<S::Reader>, Arc<DirectoryIndex>), ThumbnailError> {
        source.ensure_usable()?;
        let reader = self.source.open(source).await?;
        let reader =
            BlockCache::with_capacity(reader, self.config.block_size, self.config.block_capacity);

        let key = DirectoryKey::new(source.cache_identity(), reader.content_identity());
        if let Some(key) = &key {
            if let Some(index) = self.directories.get(key).await {
                debug!("Directory cache hit for {}", key.identity);
                return Ok((reader, index));
            }
        }

        let index = Arc::new(self.config.parser.parse(&reader).await?);
        debug!(
            "Parsed {} pages of {} in {} requests",
            index.len(),
            source.cache_identity(),
            reader.request_count()
        );
        if let Some(key) = key {
            self.directories.insert(key, Arc::clone(&index)).await;
        }
        Ok((reader, index))
    }

    async fn render_thumbnail(
        &self,
        source: &RemoteSource,
        reader: &BlockCache<S::Reader>,
        index: &DirectoryIndex,
        max_dimension: u32,
    ) -> Result<ThumbnailOutput, ThumbnailError> {
        let candidate = select(index).ok_or(ThumbnailError::NoImagePages)?;
        let page = fetch_page(index, &candidate, reader, &self.config.decode).await?;
        let (width, height) = fit_within(page.layout.width, page.layout.height, max_dimension);

        let png = tokio::task::spawn_blocking(move || {
            let image = page.decode()?;
            Ok::<_, ThumbnailError>(render(&image, max_dimension)?)
        })
        .await
        .map_err(|e| ThumbnailError::Join(e.to_string()))??;

        let stats = FetchStats::of(reader);
        info!(
            "Thumbnail for {} from page {} ({:?}): {}x{}, {} bytes, fetched {} of {} bytes in {} requests",
            source.cache_identity(),
            candidate.page_index,
            candidate.kind,
            width,
            height,
            png.len(),
            stats.bytes_fetched,
            stats.file_size,
            stats.requests
        );

        Ok(ThumbnailOutput {
            png,
            width,
            height,
            candidate,
            stats,
        })
    }
}

fn check_dimension(max_dimension: u32) -> Result<(), ThumbnailError> {
    if max_dimension == 0 {
        return Err(RenderError::InvalidDimension(max_dimension).into());
    }
    Ok(())
}
