//! Writable in-memory partition

use super::series::SeriesBuffer;
use crate::error::{Result, StorageError};
use crate::types::{marshal_series_key, DataPoint, Label, Row, Timestamp, TimestampPrecision};
use crate::wal::{Wal, WalRecord};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A memory partition owns the per-series buffers for one time shard and
/// appends every accepted row to its WAL segment before touching them.
pub struct MemoryPartition {
    series: DashMap<Box<[u8]>, Arc<SeriesBuffer>>,
    num_points: AtomicUsize,
    // Zero means "not yet set"; fixed by the first insert batch
    min_t: AtomicI64,
    max_t: AtomicI64,
    wal: Arc<Wal>,
    /// Maximum time span, in the configured precision
    partition_duration: i64,
    precision: TimestampPrecision,
}

impl MemoryPartition {
    /// Create an empty partition attached to the given WAL
    pub fn new(wal: Arc<Wal>, partition_duration: Duration, precision: TimestampPrecision) -> Self {
        Self {
            series: DashMap::new(),
            num_points: AtomicUsize::new(0),
            min_t: AtomicI64::new(0),
            max_t: AtomicI64::new(0),
            wal,
            partition_duration: precision.duration_to_units(partition_duration),
            precision,
        }
    }

    /// Insert a batch of rows.
    ///
    /// Rows with a zero timestamp receive the current wall clock first, so
    /// the WAL logs exactly what the buffers will hold. The WAL append
    /// happens before any buffer mutation: a failure aborts the whole batch
    /// untouched. Rows older than the partition's minimum timestamp are
    /// returned for the caller to route or drop.
    pub fn insert_rows(&self, rows: &[Row]) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Err(StorageError::InvalidArgument("no rows given".into()));
        }

        let mut entries: Vec<(Vec<u8>, DataPoint)> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut point = row.data_point;
            if point.timestamp == 0 {
                point.timestamp = self.precision.now();
            }
            entries.push((marshal_series_key(&row.metric, &row.labels), point));
        }

        let records: Vec<(&[u8], DataPoint)> = entries
            .iter()
            .map(|(key, point)| (key.as_slice(), *point))
            .collect();
        self.wal.append(&records)?;

        // The minimum timestamp is fixed by whichever batch gets here first
        if self.min_t.load(Ordering::Acquire) == 0 {
            let batch_min = entries.iter().map(|(_, p)| p.timestamp).min().unwrap();
            let _ = self.min_t.compare_exchange(
                0,
                batch_min,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        let min_t = self.min_t.load(Ordering::Acquire);
        let mut outdated = Vec::new();
        let mut batch_max = i64::MIN;
        let mut accepted = 0usize;

        for (i, (key, point)) in entries.into_iter().enumerate() {
            if point.timestamp < min_t {
                let row = &rows[i];
                outdated.push(Row::with_labels(
                    row.metric.clone(),
                    row.labels.clone(),
                    point,
                ));
                continue;
            }
            batch_max = batch_max.max(point.timestamp);
            self.buffer_for(key).insert(point);
            accepted += 1;
        }

        if accepted > 0 {
            self.num_points.fetch_add(accepted, Ordering::AcqRel);
            self.max_t.fetch_max(batch_max, Ordering::AcqRel);
        }

        Ok(outdated)
    }

    /// Rebuild this partition's contents from one replayed WAL segment.
    ///
    /// A partition corresponds to exactly one segment and recovery owns it
    /// exclusively, so the buffers are rebuilt from scratch: replaying the
    /// same segment again converges to the same state instead of doubling
    /// every point. Replay bypasses the WAL (the records are already on
    /// disk) and the live outdated check (the running minimum is
    /// maintained instead).
    pub(crate) fn replay_segment(&self, records: &[WalRecord]) {
        self.series.clear();

        let mut min_t = 0i64;
        let mut max_t = 0i64;
        for record in records {
            let point = record.point;
            self.buffer_for(record.key.clone()).insert(point);
            if min_t == 0 || point.timestamp < min_t {
                min_t = point.timestamp;
            }
            max_t = max_t.max(point.timestamp);
        }

        self.num_points.store(records.len(), Ordering::Release);
        self.min_t.store(min_t, Ordering::Release);
        self.max_t.store(max_t, Ordering::Release);
    }

    fn buffer_for(&self, key: Vec<u8>) -> Arc<SeriesBuffer> {
        self.series
            .entry(key.into_boxed_slice())
            .or_insert_with(|| Arc::new(SeriesBuffer::new()))
            .clone()
    }

    /// Select one series' visible points within `[start, end)`
    pub fn select_data_points(
        &self,
        metric: &str,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DataPoint>> {
        let key = marshal_series_key(metric, labels);
        match self.series.get(key.as_slice()) {
            Some(buffer) => Ok(buffer.select_range(start, end)),
            None => Err(StorageError::NoDataPoints),
        }
    }

    /// Snapshot every series into `(key, ascending points)` pairs, sorted
    /// by key for a deterministic on-disk layout. Used only by the flush
    /// path.
    pub(crate) fn collect_series(&self) -> Vec<(Box<[u8]>, Vec<DataPoint>)> {
        let mut drained: Vec<(Box<[u8]>, Vec<DataPoint>)> = self
            .series
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().collect_sorted()))
            .collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
    }

    pub fn min_timestamp(&self) -> Timestamp {
        self.min_t.load(Ordering::Acquire)
    }

    pub fn max_timestamp(&self) -> Timestamp {
        self.max_t.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.num_points.load(Ordering::Acquire)
    }

    /// A partition is active while its observed span is within the
    /// configured duration. Empty partitions are active.
    pub fn active(&self) -> bool {
        self.max_timestamp() - self.min_timestamp() < self.partition_duration
    }
}
