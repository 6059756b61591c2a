//! Range-based I/O over remote slides.
//!
//! Everything above this layer sees a slide as a [`RangeReader`]: a sized
//! byte source answering `read(offset, length)`. The HTTP implementation
//! retries transient failures, [`BlockCache`] absorbs the many small reads
//! of directory walking, and [`fetch_coalesced`] batches pixel segments.

mod block_cache;
mod coalesce;
mod http_reader;
mod range_reader;
mod retry;

#[cfg(test)]
pub(crate) mod mock;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use coalesce::{
    fetch_coalesced, plan_coalesced, ByteRange, CoalescePolicy, CoalescedRead, DEFAULT_MAX_GAP,
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_SPAN,
};
pub use http_reader::{parse_content_range_total, HttpRangeReader, DEFAULT_PROBE_SIZE};
pub use range_reader::{check_range, RangeReader};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
