//! Persisting rendered thumbnails.
//!
//! The thumbnail of `.../bucket/path/slide.svs` lands at
//! `bucket/path/slide_thumbnail.png`. When an output bucket is configured,
//! only the file name is kept and written there instead.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::info;
use url::Url;

use crate::error::StoreError;

/// Suffix replacing the slide's extension.
pub const THUMBNAIL_SUFFIX: &str = "_thumbnail.png";

/// Destination of a thumbnail inside object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailLocation {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for ThumbnailLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Split an object URL into bucket and key.
///
/// Understands GCS (`storage.googleapis.com/bucket/key`,
/// `storage.cloud.google.com/bucket/key`), virtual-hosted S3
/// (`bucket.s3[.region].amazonaws.com/key`), and path-style URLs of any
/// other host (`host/bucket/key`, as served by MinIO and S3 itself).
/// Object keys are returned percent-decoded.
fn bucket_and_key(url: &Url) -> Option<(String, String)> {
    let host = url.host_str()?;
    let decoded = urlencoding::decode(url.path()).ok()?;
    let path = decoded.trim_start_matches('/');

    let virtual_hosted = host
        .split_once(".s3.")
        .or_else(|| host.split_once(".s3-"))
        .filter(|(_, rest)| rest.ends_with("amazonaws.com"));
    if let Some((bucket, _)) = virtual_hosted {
        return (!path.is_empty()).then(|| (bucket.to_string(), path.to_string()));
    }

    let (bucket, key) = path.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket.to_string(), key.to_string()))
}

/// Replace the extension of the last path segment with the thumbnail suffix.
fn thumbnail_key(key: &str) -> String {
    let (dir, file) = match key.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, key),
    };
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };
    match dir {
        Some(dir) => format!("{}/{}{}", dir, stem, THUMBNAIL_SUFFIX),
        None => format!("{}{}", stem, THUMBNAIL_SUFFIX),
    }
}

/// Derive where the thumbnail of `source` is written.
pub fn thumbnail_location(
    source: &Url,
    output_bucket: Option<&str>,
    prefix: Option<&str>,
) -> Result<ThumbnailLocation, StoreError> {
    let with_prefix = |key: String| match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{}/{}", p, key),
        _ => key,
    };

    match output_bucket.filter(|b| !b.is_empty()) {
        Some(bucket) => {
            let file = source
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    StoreError::InvalidLocation(format!("{} has no file name", source.path()))
                })?;
            let file = urlencoding::decode(file).map_err(|_| {
                StoreError::InvalidLocation(format!("{} is not UTF-8 once decoded", file))
            })?;
            Ok(ThumbnailLocation {
                bucket: bucket.to_string(),
                key: with_prefix(thumbnail_key(&file)),
            })
        }
        None => {
            let (bucket, key) = bucket_and_key(source).ok_or_else(|| {
                StoreError::InvalidLocation(format!(
                    "cannot derive a bucket from {}{} and no output bucket is configured",
                    source.host_str().unwrap_or(""),
                    source.path()
                ))
            })?;
            Ok(ThumbnailLocation {
                bucket,
                key: with_prefix(thumbnail_key(&key)),
            })
        }
    }
}

/// Where rendered thumbnails are written.
#[async_trait]
pub trait ThumbnailStore: Send + Sync {
    /// Write `png` to `location` and return its link.
    async fn put(&self, location: &ThumbnailLocation, png: Bytes) -> Result<String, StoreError>;
}

/// Thumbnail store backed by S3 or an S3-compatible service.
#[derive(Clone)]
pub struct S3ThumbnailStore {
    client: Client,
}

impl S3ThumbnailStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ThumbnailStore for S3ThumbnailStore {
    async fn put(&self, location: &ThumbnailLocation, png: Bytes) -> Result<String, StoreError> {
        let size = png.len();
        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .content_type("image/png")
            .body(ByteStream::from(png))
            .send()
            .await
            .map_err(|e| StoreError::Upload(format!("{}: {}", location, e)))?;

        info!("Stored {} byte thumbnail at {}", size, location);
        Ok(location.to_string())
    }
}

/// In-memory store, for tests and dry runs.
#[derive(Default)]
pub struct MemoryThumbnailStore {
    objects: RwLock<HashMap<ThumbnailLocation, Bytes>>,
}

impl MemoryThumbnailStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, location: &ThumbnailLocation) -> Option<Bytes> {
        self.objects.read().await.get(location).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ThumbnailStore for MemoryThumbnailStore {
    async fn put(&self, location: &ThumbnailLocation, png: Bytes) -> Result<String, StoreError> {
        self.objects.write().await.insert(location.clone(), png);
        Ok(location.to_string())
    }
}

/// Create an S3 client for the given endpoint and region.
///
/// A custom endpoint (MinIO and friends) switches to path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);
    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    let builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    let s3_config = if endpoint_url.is_some() {
        builder.force_path_style(true).build()
    } else {
        builder.build()
    };
    Client::from_conf(s3_config)
}
