//! Per-series in-memory point buffer

use crate::types::{DataPoint, Timestamp};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

/// Holds one series' points inside a memory partition.
///
/// The fast path appends to an ordered vector; a point arriving behind the
/// current tail spills into an overflow vector instead, and the two are
/// merged when the partition is flushed. Until then only the ordered prefix
/// is visible to reads. Writers never shorten the ordered vector, so readers
/// always observe a consistent append-only prefix.
pub struct SeriesBuffer {
    inner: RwLock<Buffers>,
    min_t: AtomicI64,
    max_t: AtomicI64,
    count: AtomicUsize,
}

#[derive(Default)]
struct Buffers {
    ordered: Vec<DataPoint>,
    overflow: Vec<DataPoint>,
}

impl SeriesBuffer {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Buffers::default()),
            min_t: AtomicI64::new(0),
            max_t: AtomicI64::new(0),
            count: AtomicUsize::new(0),
        }
    }

    /// Insert one point
    pub fn insert(&self, point: DataPoint) {
        let mut buffers = self.inner.write();
        match buffers.ordered.last() {
            None => {
                buffers.ordered.push(point);
                self.min_t.store(point.timestamp, Ordering::Release);
                self.max_t.store(point.timestamp, Ordering::Release);
            }
            Some(last) if point.timestamp >= last.timestamp => {
                buffers.ordered.push(point);
                self.max_t.fetch_max(point.timestamp, Ordering::AcqRel);
            }
            Some(_) => {
                // Behind the tail; merged at flush time
                buffers.overflow.push(point);
                self.min_t.fetch_min(point.timestamp, Ordering::AcqRel);
                self.max_t.fetch_max(point.timestamp, Ordering::AcqRel);
            }
        }
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// The ordered points within `[start, end)`, located by binary search
    /// on both endpoints. Overflow points are not surfaced here.
    pub fn select_range(&self, start: Timestamp, end: Timestamp) -> Vec<DataPoint> {
        let buffers = self.inner.read();
        let lo = buffers.ordered.partition_point(|p| p.timestamp < start);
        let hi = buffers.ordered.partition_point(|p| p.timestamp < end);
        buffers.ordered[lo..hi].to_vec()
    }

    /// Every point, ordered and overflow merged into one ascending
    /// sequence. Only called when the partition is being flushed; the
    /// buffers are left untouched so a failed flush can retry.
    pub fn collect_sorted(&self) -> Vec<DataPoint> {
        let buffers = self.inner.read();
        let ordered = buffers.ordered.clone();
        let mut overflow = buffers.overflow.clone();
        drop(buffers);

        if overflow.is_empty() {
            return ordered;
        }
        overflow.sort_by_key(|p| p.timestamp);

        let mut merged = Vec::with_capacity(ordered.len() + overflow.len());
        let mut a = ordered.into_iter().peekable();
        let mut b = overflow.into_iter().peekable();
        loop {
            match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => {
                    if x.timestamp <= y.timestamp {
                        merged.push(a.next().unwrap());
                    } else {
                        merged.push(b.next().unwrap());
                    }
                }
                (Some(_), None) => merged.push(a.next().unwrap()),
                (None, Some(_)) => merged.push(b.next().unwrap()),
                (None, None) => break,
            }
        }
        merged
    }

    pub fn min_timestamp(&self) -> Timestamp {
        self.min_t.load(Ordering::Acquire)
    }

    pub fn max_timestamp(&self) -> Timestamp {
        self.max_t.load(Ordering::Acquire)
    }

    /// Total points held, ordered and overflow together
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl Default for SeriesBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(ts: i64) -> DataPoint {
        DataPoint::new(ts, ts as f64)
    }

    #[test]
    fn test_in_order_select_half_open() {
        let buffer = SeriesBuffer::new();
        for ts in [10, 20, 30, 40, 50] {
            buffer.insert(pt(ts));
        }

        let got = buffer.select_range(20, 40);
        assert_eq!(got, vec![pt(20), pt(30)]);

        // End is exclusive, start inclusive
        assert!(buffer.select_range(51, 100).is_empty());
        assert_eq!(buffer.select_range(50, 51), vec![pt(50)]);
        assert_eq!(buffer.select_range(0, 100).len(), 5);
    }

    #[test]
    fn test_equal_timestamps_append_in_order() {
        let buffer = SeriesBuffer::new();
        buffer.insert(DataPoint::new(10, 1.0));
        buffer.insert(DataPoint::new(10, 2.0));
        let got = buffer.select_range(10, 11);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].value, 1.0);
        assert_eq!(got[1].value, 2.0);
    }

    #[test]
    fn test_out_of_order_hidden_until_merge() {
        let buffer = SeriesBuffer::new();
        for ts in [10, 30, 20, 40] {
            buffer.insert(pt(ts));
        }

        // 20 arrived behind 30: invisible to reads
        assert_eq!(buffer.select_range(0, 100), vec![pt(10), pt(30), pt(40)]);
        assert_eq!(buffer.count(), 4);
        assert_eq!(buffer.min_timestamp(), 10);
        assert_eq!(buffer.max_timestamp(), 40);

        // The flush-time merge puts it back into place
        assert_eq!(
            buffer.collect_sorted(),
            vec![pt(10), pt(20), pt(30), pt(40)]
        );
    }

    #[test]
    fn test_overflow_below_first_point_updates_min() {
        let buffer = SeriesBuffer::new();
        buffer.insert(pt(100));
        buffer.insert(pt(200));
        buffer.insert(pt(50));
        assert_eq!(buffer.min_timestamp(), 50);
        assert_eq!(buffer.collect_sorted(), vec![pt(50), pt(100), pt(200)]);
    }

    #[test]
    fn test_count_matches_both_regions() {
        let buffer = SeriesBuffer::new();
        for ts in [5, 1, 9, 2, 7] {
            buffer.insert(pt(ts));
        }
        assert_eq!(buffer.count(), 5);
        assert_eq!(buffer.collect_sorted().len(), 5);
    }
}
