//! Parsed-directory cache.
//!
//! Parsing a slide's directory chain costs a handful of round trips. When
//! the same object is requested again, the parsed [`DirectoryIndex`] is
//! reused, but only if the server reported an ETag: the key is the source
//! URL (query string stripped) plus that ETag, so a replaced object never
//! hits a stale entry.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;

use crate::format::tiff::DirectoryIndex;

/// Default number of cached directories.
pub const DEFAULT_DIRECTORY_CACHE_CAPACITY: usize = 256;

/// Default entry lifetime.
pub const DEFAULT_DIRECTORY_CACHE_TTL: Duration = Duration::from_secs(600);

/// Cache key: structural identity plus content identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryKey {
    pub identity: String,
    pub etag: String,
}

impl DirectoryKey {
    /// Build a key, or `None` for sources without an ETag.
    pub fn new(identity: impl Into<String>, etag: Option<&str>) -> Option<Self> {
        Some(Self {
            identity: identity.into(),
            etag: etag?.to_string(),
        })
    }
}

struct Entry {
    index: Arc<DirectoryIndex>,
    inserted: Instant,
}

/// LRU of parsed directories with a time-to-live.
pub struct DirectoryCache {
    entries: Mutex<LruCache<DirectoryKey, Entry>>,
    ttl: Duration,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DIRECTORY_CACHE_CAPACITY, DEFAULT_DIRECTORY_CACHE_TTL)
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Look up a directory; expired entries are evicted and reported as misses.
    pub async fn get(&self, key: &DirectoryKey) -> Option<Arc<DirectoryIndex>> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => {
                return Some(Arc::clone(&entry.index))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub async fn insert(&self, key: DirectoryKey, index: Arc<DirectoryIndex>) {
        self.entries.lock().await.put(
            key,
            Entry {
                index,
                inserted: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new()
    }
}
