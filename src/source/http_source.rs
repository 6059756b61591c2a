use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{RemoteSource, SlideSource};
use crate::error::IoError;
use crate::io::{HttpRangeReader, RetryPolicy, DEFAULT_PROBE_SIZE};

/// Default TCP connect timeout for range requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout of one range request, body included.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// [`SlideSource`] reading slides over HTTP(S) range requests.
///
/// One `reqwest::Client` (and its connection pool) is shared by every
/// reader this source opens.
#[derive(Clone)]
pub struct HttpSlideSource {
    client: Client,
    retry: RetryPolicy,
    probe_size: usize,
}

impl HttpSlideSource {
    /// Create a source with default timeouts.
    pub fn new(retry: RetryPolicy) -> Result<Self, IoError> {
        Self::with_timeouts(retry, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// Create a source with explicit connect and per-request timeouts.
    pub fn with_timeouts(
        retry: RetryPolicy,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, IoError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .user_agent(concat!("wsi-thumbnailer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IoError::InvalidSource(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, retry))
    }

    /// Use an existing client.
    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            probe_size: DEFAULT_PROBE_SIZE,
        }
    }

    /// Change the size of the opening probe read.
    pub fn with_probe_size(mut self, probe_size: usize) -> Self {
        self.probe_size = probe_size;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

#[async_trait]
impl SlideSource for HttpSlideSource {
    type Reader = HttpRangeReader;

    async fn open(&self, source: &RemoteSource) -> Result<Self::Reader, IoError> {
        HttpRangeReader::open(self.client.clone(), source, self.retry, self.probe_size).await
    }
}
