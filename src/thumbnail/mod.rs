//! Thumbnail rendering, orchestration and storage.

mod cache;
mod render;
mod service;
mod store;

pub use cache::{
    DirectoryCache, DirectoryKey, DEFAULT_DIRECTORY_CACHE_CAPACITY, DEFAULT_DIRECTORY_CACHE_TTL,
};
pub use render::{fit_within, render};
pub use service::{
    FetchStats, ServiceConfig, SlideReport, ThumbnailOutput, ThumbnailService,
    DEFAULT_MAX_DIMENSION, DEFAULT_REQUEST_TIMEOUT,
};
pub use store::{
    create_s3_client, thumbnail_location, MemoryThumbnailStore, S3ThumbnailStore,
    ThumbnailLocation, ThumbnailStore, THUMBNAIL_SUFFIX,
};
