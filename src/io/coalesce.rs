//! Read coalescing and bounded concurrent fetching.
//!
//! Strip/tile tables and small out-of-line tag values tend to sit close to
//! each other. Instead of one request per range, nearby ranges are merged
//! into a single larger read and the result is sliced back apart. Merged
//! reads are then issued through a bounded stream: at most `max_in_flight`
//! requests run at once, and the first failure drops the rest.

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};

use super::RangeReader;
use crate::error::IoError;

/// Default maximum gap bridged when merging two ranges.
pub const DEFAULT_MAX_GAP: u64 = 64 * 1024;

/// Default maximum size of one merged read.
pub const DEFAULT_MAX_SPAN: u64 = 8 * 1024 * 1024;

/// Default number of simultaneous range requests.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// A byte range of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    pub const fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// Exclusive end offset.
    pub const fn end(&self) -> u64 {
        self.offset.saturating_add(self.len)
    }
}

/// Merge thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescePolicy {
    /// Ranges separated by at most this many bytes are merged
    pub max_gap: u64,
    /// A merged read never grows beyond this many bytes
    pub max_span: u64,
}

impl Default for CoalescePolicy {
    fn default() -> Self {
        Self {
            max_gap: DEFAULT_MAX_GAP,
            max_span: DEFAULT_MAX_SPAN,
        }
    }
}

impl CoalescePolicy {
    /// Never merge; one read per requested range.
    pub fn disabled() -> Self {
        Self {
            max_gap: 0,
            max_span: 0,
        }
    }
}

/// One read to issue, and the requested ranges it satisfies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedRead {
    pub range: ByteRange,
    /// Indices into the requested ranges
    pub members: Vec<usize>,
}

/// Plan the reads needed to cover `ranges`.
///
/// Ranges are visited in offset order; a range joins the current read when
/// it overlaps it or starts at most `max_gap` bytes after its end, and the
/// merged read stays within `max_span`. Zero-length ranges need no read and
/// are left out of the plan.
pub fn plan_coalesced(ranges: &[ByteRange], policy: CoalescePolicy) -> Vec<CoalescedRead> {
    let mut order: Vec<usize> = (0..ranges.len()).filter(|&i| ranges[i].len > 0).collect();
    order.sort_by_key(|&i| (ranges[i].offset, ranges[i].len));

    let mut plan: Vec<CoalescedRead> = Vec::new();
    for index in order {
        let range = ranges[index];
        if let Some(current) = plan.last_mut() {
            let start = current.range.offset;
            let end = current.range.end();
            let merged_end = end.max(range.end());
            let close_enough = range.offset <= end.saturating_add(policy.max_gap);
            let overlaps = range.offset < end;
            if overlaps || (close_enough && merged_end - start <= policy.max_span) {
                current.range.len = merged_end - start;
                current.members.push(index);
                continue;
            }
        }
        plan.push(CoalescedRead {
            range,
            members: vec![index],
        });
    }
    plan
}

/// Fetch every range in `ranges`, returning their bytes in request order.
///
/// Reads are coalesced per `policy` and issued with at most `max_in_flight`
/// in flight. Any failure aborts the whole batch; pending reads are dropped.
pub async fn fetch_coalesced<R>(
    reader: &R,
    ranges: &[ByteRange],
    policy: CoalescePolicy,
    max_in_flight: usize,
) -> Result<Vec<Bytes>, IoError>
where
    R: RangeReader + ?Sized,
{
    let plan = plan_coalesced(ranges, policy);

    let fetched: Vec<(CoalescedRead, Bytes)> = stream::iter(plan.into_iter().map(|read| async move {
        let data = reader
            .read_exact_at(read.range.offset, read.range.len as usize)
            .await?;
        Ok::<_, IoError>((read, data))
    }))
    .buffered(max_in_flight.max(1))
    .try_collect()
    .await?;

    let mut out = vec![Bytes::new(); ranges.len()];
    for (read, data) in fetched {
        for &index in &read.members {
            let range = ranges[index];
            let start = (range.offset - read.range.offset) as usize;
            out[index] = data.slice(start..start + range.len as usize);
        }
    }
    Ok(out)
}
