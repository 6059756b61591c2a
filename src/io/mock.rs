use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// In-memory reader for unit tests that counts read calls.
pub(crate) struct MemoryReader {
    data: Bytes,
    etag: Option<String>,
    read_count: AtomicUsize,
}

impl MemoryReader {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            etag: None,
            read_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_etag(mut self, etag: &str) -> Self {
        self.etag = Some(etag.to_string());
        self
    }

    pub(crate) fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RangeReader for MemoryReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        check_range(offset, len, self.data.len() as u64)?;
        Ok(self.data.slice(offset as usize..offset as usize + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        "mem://test"
    }

    fn content_identity(&self) -> Option<&str> {
        self.etag.as_deref()
    }
}
