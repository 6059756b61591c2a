use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a remote resource.
///
/// This abstraction lets the TIFF parser and the decoder work on a slide
/// without downloading it. Implementations must be thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Near the end of the resource fewer bytes are returned; the short
    /// length is how callers bounds-check headers against tiny files.
    /// An `offset` at or past the end is an error.
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let size = self.size();
        if offset >= size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }
        let available = (size - offset).min(len as u64) as usize;
        self.read_exact_at(offset, available).await
    }

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get an identifier for this resource, used in logs.
    ///
    /// Must never contain credentials; for HTTP sources the query string is
    /// stripped.
    fn identifier(&self) -> &str;

    /// Token identifying the exact content (an HTTP ETag), when known.
    fn content_identity(&self) -> Option<&str> {
        None
    }
}

/// Validate that `[offset, offset + len)` lies inside a resource of `size` bytes.
pub fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}
