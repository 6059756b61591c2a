//! Remote slide sources.
//!
//! A [`RemoteSource`] names a slide (URL plus optional credential). A
//! [`SlideSource`] turns it into a [`RangeReader`]; the service is generic
//! over the latter so tests can open in-memory fixtures instead of URLs.

mod http_source;
mod remote;

use async_trait::async_trait;

use crate::error::IoError;
use crate::io::RangeReader;

pub use http_source::{HttpSlideSource, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
pub use remote::RemoteSource;

/// Opens range readers for remote sources.
#[async_trait]
pub trait SlideSource: Send + Sync {
    /// The type of range reader this source creates.
    type Reader: RangeReader + 'static;

    /// Open a reader for `source`.
    ///
    /// # Errors
    /// `PermissionDenied` for expired or rejected credentials, `NotFound`
    /// for missing objects, `Transient` once retries are exhausted.
    async fn open(&self, source: &RemoteSource) -> Result<Self::Reader, IoError>;
}
