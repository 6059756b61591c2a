use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, ETAG, RANGE};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;
use url::Url;

use super::range_reader::check_range;
use super::retry::RetryPolicy;
use super::RangeReader;
use crate::error::IoError;
use crate::source::RemoteSource;

/// Bytes requested by the opening probe.
///
/// The TIFF header and, for most scanners, the first directory fall inside
/// this prefix, so it is kept and served without further requests.
pub const DEFAULT_PROBE_SIZE: usize = 16 * 1024;

/// HTTP implementation of [`RangeReader`] using `Range: bytes=` requests.
///
/// The object size comes from the `Content-Range` header of a ranged probe
/// GET issued on open. HEAD is avoided because signed URLs are usually
/// only valid for GET.
pub struct HttpRangeReader {
    client: Client,
    url: Url,
    authorization: Option<String>,
    size: u64,
    etag: Option<String>,
    identifier: String,
    retry: RetryPolicy,
    prefix: Bytes,
}

impl std::fmt::Debug for HttpRangeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRangeReader")
            .field("url", &self.identifier)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("size", &self.size)
            .field("etag", &self.etag)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HttpRangeReader {
    /// Open a remote source by probing its first `probe_size` bytes.
    ///
    /// Fails with `PermissionDenied` before any traffic if the source's
    /// credential has expired.
    pub async fn open(
        client: Client,
        source: &RemoteSource,
        retry: RetryPolicy,
        probe_size: usize,
    ) -> Result<Self, IoError> {
        source.ensure_usable()?;

        let identifier = source.cache_identity();
        let probe_size = probe_size.max(16);
        let url = source.url().clone();
        let authorization = source.authorization().map(str::to_string);

        let (size, etag, prefix) = retry
            .run("range probe", || {
                probe(&client, &url, authorization.as_deref(), &identifier, probe_size)
            })
            .await?;

        debug!(
            "Opened {}: {} bytes, etag {:?}, {} byte prefix",
            identifier,
            size,
            etag,
            prefix.len()
        );

        Ok(Self {
            client,
            url,
            authorization,
            size,
            etag,
            identifier,
            retry,
            prefix,
        })
    }

    async fn fetch_range(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let last = offset + len as u64 - 1;
        let mut request = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={}-{}", offset, last));
        if let Some(ref auth) = self.authorization {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => {
                return Err(IoError::RangeNotSupported(self.identifier.clone()));
            }
            status => return Err(map_status(status, &self.identifier)),
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        if body.len() < len {
            return Err(IoError::Transient(format!(
                "short body for {} at offset {}: got {} of {} bytes",
                self.identifier,
                offset,
                body.len(),
                len
            )));
        }
        Ok(body.slice(..len))
    }
}

#[async_trait]
impl RangeReader for HttpRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let end = offset + len as u64;
        if end <= self.prefix.len() as u64 {
            return Ok(self.prefix.slice(offset as usize..end as usize));
        }

        self.retry
            .run("range read", || self.fetch_range(offset, len))
            .await
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn content_identity(&self) -> Option<&str> {
        self.etag.as_deref()
    }
}

/// Issue the opening probe and return `(size, etag, prefix)`.
async fn probe(
    client: &Client,
    url: &Url,
    authorization: Option<&str>,
    identifier: &str,
    probe_size: usize,
) -> Result<(u64, Option<String>, Bytes), IoError> {
    let mut request = client
        .get(url.clone())
        .header(RANGE, format!("bytes=0-{}", probe_size - 1));
    if let Some(auth) = authorization {
        request = request.header(AUTHORIZATION, auth);
    }

    let response = request.send().await.map_err(map_reqwest_error)?;
    let etag = header_str(&response, ETAG).map(str::to_string);

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {
            let size = header_str(&response, CONTENT_RANGE)
                .and_then(parse_content_range_total)
                .ok_or_else(|| {
                    IoError::RangeNotSupported(format!(
                        "{}: missing or unusable Content-Range",
                        identifier
                    ))
                })?;
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            let expected = size.min(probe_size as u64) as usize;
            if body.len() < expected {
                return Err(IoError::Transient(format!(
                    "short probe body for {}: got {} of {} bytes",
                    identifier,
                    body.len(),
                    expected
                )));
            }
            Ok((size, etag, body.slice(..expected)))
        }
        StatusCode::OK => {
            // A server that ignores Range is only tolerable when the whole
            // object fits inside the probe we asked for anyway.
            let length = header_str(&response, CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok());
            match length {
                Some(len) if len <= probe_size as u64 => {
                    let body = response.bytes().await.map_err(map_reqwest_error)?;
                    Ok((body.len() as u64, etag, body))
                }
                _ => Err(IoError::RangeNotSupported(identifier.to_string())),
            }
        }
        StatusCode::RANGE_NOT_SATISFIABLE => {
            let size = header_str(&response, CONTENT_RANGE)
                .and_then(parse_content_range_total)
                .unwrap_or(0);
            Err(IoError::RangeOutOfBounds {
                offset: 0,
                requested: probe_size as u64,
                size,
            })
        }
        status => Err(map_status(status, identifier)),
    }
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<&str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Parse the total length out of `bytes 0-99/12345` (or `bytes */12345`).
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (_, total) = rest.split_once('/')?;
    total.trim().parse().ok()
}

/// Map a non-success HTTP status onto the fetch error taxonomy.
pub fn map_status(status: StatusCode, identifier: &str) -> IoError {
    match status.as_u16() {
        401 | 403 => IoError::PermissionDenied(format!("{} ({})", identifier, status)),
        404 | 410 => IoError::NotFound(identifier.to_string()),
        416 => IoError::RangeOutOfBounds {
            offset: 0,
            requested: 0,
            size: 0,
        },
        408 | 429 | 500..=599 => IoError::Transient(format!("{} ({})", identifier, status)),
        code => IoError::Http {
            status: code,
            message: identifier.to_string(),
        },
    }
}

fn map_reqwest_error(err: reqwest::Error) -> IoError {
    if err.is_builder() {
        return IoError::InvalidSource(err.without_url().to_string());
    }
    // Connect failures, timeouts and truncated bodies are all worth a retry.
    // The URL is dropped from the message: it may carry a signature.
    IoError::Transient(err.without_url().to_string())
}
