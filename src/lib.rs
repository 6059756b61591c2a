//! # WSI Thumbnailer
//!
//! Thumbnails and metadata of Whole Slide Images (WSI) stored behind HTTP(S)
//! URLs, read through range requests.
//!
//! A slide is a TIFF or BigTIFF file of several gigabytes. Producing its
//! thumbnail needs the directory chain and one small page, usually well
//! under 1% of the file. Nothing else is downloaded.
//!
//! ## Features
//!
//! - **Range-based reads**: block cache for directory walking, coalesced
//!   and concurrent reads for pixel segments, retries for transient failures
//! - **Format support**: classic TIFF and BigTIFF in either byte order;
//!   uncompressed, LZW, Deflate, PackBits, JPEG and JPEG 2000 segments
//! - **Page selection**: reduced-resolution pages and the Aperio thumbnail
//!   convention, falling back to the smallest page
//! - **Vendor metadata**: dimensions, microns per pixel and objective power
//!   for Aperio, Hamamatsu, Leica, Ventana and Philips slides
//!
//! ## Architecture
//!
//! - [`io`] - Range readers, block cache, coalescing and retries
//! - [`source`] - Remote slide sources and credentials
//! - [`mod@format`] - TIFF directory parsing, page selection, metadata
//! - [`decode`] - Strip and tile decoding into rasters
//! - [`thumbnail`] - Rendering, orchestration, directory cache, storage
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_thumbnailer::{HttpSlideSource, RemoteSource, RetryPolicy, ThumbnailService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ThumbnailService::new(HttpSlideSource::new(RetryPolicy::default())?);
//!     let slide = RemoteSource::parse("https://storage.googleapis.com/slides/CMU-1.svs")?;
//!
//!     let metadata = service.metadata(&slide).await?;
//!     println!("{}x{} from {}", metadata.width, metadata.height, metadata.vendor);
//!
//!     let thumbnail = service.thumbnail(&slide, 512).await?;
//!     std::fs::write("thumb.png", &thumbnail.png)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod format;
pub mod io;
pub mod server;
pub mod source;
pub mod thumbnail;

// Re-export commonly used types
pub use config::{Cli, Command, InspectConfig, ServeConfig};
pub use decode::{DecodeOptions, DecodedImage};
pub use error::{
    DecodeError, ErrorKind, IoError, RenderError, StoreError, ThumbnailError, TiffError,
};
pub use format::tiff::{
    ByteOrder, Compression, DirectoryIndex, DirectoryParser, FieldType, Ifd, IfdEntry, TagValue,
    TiffHeader, TiffTag, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE,
};
pub use format::{extract, select, CandidateKind, SlideMetadata, ThumbnailCandidate};
pub use io::{BlockCache, HttpRangeReader, RangeReader, RetryPolicy};
pub use server::{create_router, AppState, RouterConfig};
pub use source::{HttpSlideSource, RemoteSource, SlideSource};
pub use thumbnail::{
    render, thumbnail_location, DirectoryCache, MemoryThumbnailStore, S3ThumbnailStore,
    SlideReport, ThumbnailOutput, ThumbnailService, ThumbnailStore,
};
