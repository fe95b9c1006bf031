//! Storage engine - routes writes and reads across the partition list

use super::flush::{self, FlushContext, FlushSignal};
use super::StorageConfig;
use crate::error::{Result, StorageError};
use crate::partition::{
    DiskPartition, MemoryPartition, Partition, PartitionList, SharedPartition,
};
use crate::types::{DataPoint, Label, Row, Timestamp};
use crate::wal::{DiskWal, SegmentReader, Wal, WalReader};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

/// Subdirectory of the data path holding WAL segments
const WAL_DIR_NAME: &str = "wal";

/// Prefix of partition directories under the data path
const PARTITION_DIR_PREFIX: &str = "p-";

/// The storage engine.
///
/// Thread safe: share it behind an `Arc` and call from as many threads as
/// you like. Ingestion is gated to the logical CPU count; callers beyond
/// that wait up to the configured write timeout for a slot. Reads are not
/// gated and never block on ingestion.
pub struct Storage {
    config: StorageConfig,
    list: Arc<PartitionList>,
    wal: Arc<Wal>,

    // Admission tokens for concurrent writers; send acquires, recv releases
    workers_tx: Sender<()>,
    workers_rx: Receiver<()>,
    workers_limit: usize,

    // Writers hold read guards; close takes the write guard to drain them
    drain: RwLock<()>,
    closed: AtomicBool,
    // Serializes prepending a new head partition
    head_lock: Mutex<()>,

    flush_tx: Option<Sender<FlushSignal>>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Storage {
    /// Build an engine from the given configuration.
    ///
    /// With a data path, existing disk partitions are reopened and any WAL
    /// segments are replayed into fresh memory partitions before the engine
    /// accepts traffic. Without one, everything stays in process memory and
    /// the WAL is a no-op.
    pub fn new(config: StorageConfig) -> Result<Self> {
        let list = Arc::new(PartitionList::new());
        let workers_limit = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let (workers_tx, workers_rx) = bounded(workers_limit);

        let wal = match &config.data_path {
            Some(data_path) => {
                fs::create_dir_all(data_path)?;
                open_disk_partitions(data_path, &list)?;

                // Old segments must be scanned before the live WAL creates
                // its fresh one in the same directory
                let wal_dir = data_path.join(WAL_DIR_NAME);
                let segments = read_wal_segments(&wal_dir)?;
                let wal = Arc::new(Wal::Disk(DiskWal::create(
                    &wal_dir,
                    config.wal_buffered_size,
                )?));
                replay_segments(segments, &wal, &config, &list);
                wal
            }
            None => Arc::new(Wal::Nop),
        };

        // The live head partition, always the newest in the list
        list.insert(Arc::new(Partition::Memory(MemoryPartition::new(
            wal.clone(),
            config.partition_duration,
            config.timestamp_precision,
        ))));

        let (flush_tx, flush_handle) = match &config.data_path {
            Some(data_path) => {
                let (tx, rx) = bounded(1);
                let handle = flush::spawn(
                    FlushContext {
                        list: list.clone(),
                        wal: wal.clone(),
                        data_path: data_path.clone(),
                        writable_partitions: config.writable_partitions,
                    },
                    rx,
                )?;
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        Ok(Self {
            config,
            list,
            wal,
            workers_tx,
            workers_rx,
            workers_limit,
            drain: RwLock::new(()),
            closed: AtomicBool::new(false),
            head_lock: Mutex::new(()),
            flush_tx,
            flush_handle: Mutex::new(flush_handle),
        })
    }

    /// Ingest a batch of rows.
    ///
    /// The batch is applied atomically with respect to durability: either
    /// the WAL append succeeded and every buffer mutation followed, or an
    /// error is returned before any mutation. Returns `Overloaded` when no
    /// ingestion slot frees up within the write timeout.
    pub fn insert_rows(&self, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Err(StorageError::InvalidArgument("no rows given".into()));
        }
        if rows.iter().any(|r| r.metric.is_empty()) {
            return Err(StorageError::InvalidArgument(
                "metric must be set on every row".into(),
            ));
        }

        let _writer = self.drain.read();
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::InvalidArgument(
                "storage is closed".into(),
            ));
        }

        // Fast path: a free slot right now. Otherwise wait out the timeout.
        if self.workers_tx.try_send(()).is_err() {
            if self
                .workers_tx
                .send_timeout((), self.config.write_timeout)
                .is_err()
            {
                return Err(StorageError::Overloaded {
                    timeout: self.config.write_timeout,
                    limit: self.workers_limit,
                });
            }
        }
        let result = self.insert_admitted(rows);
        let _ = self.workers_rx.try_recv();
        result
    }

    fn insert_admitted(&self, rows: &[Row]) -> Result<()> {
        let partition = self.writable_partition();
        let outdated = partition.insert_rows(rows)?;
        if !outdated.is_empty() {
            self.route_outdated(&partition, outdated);
        }
        Ok(())
    }

    /// The head partition if it still accepts writes; otherwise a freshly
    /// prepended one with a rotated WAL segment.
    fn writable_partition(&self) -> SharedPartition {
        if let Some(head) = self.list.head() {
            if head.active() {
                return head;
            }
        }

        let _guard = self.head_lock.lock();
        // Another writer may have prepended while we waited for the lock
        if let Some(head) = self.list.head() {
            if head.active() {
                return head;
            }
        }

        if let Err(e) = self.wal.rotate() {
            warn!("failed to rotate WAL segment: {e}");
        }
        let partition = Arc::new(Partition::Memory(MemoryPartition::new(
            self.wal.clone(),
            self.config.partition_duration,
            self.config.timestamp_precision,
        )));
        self.list.insert(partition.clone());
        info!(partitions = self.list.len(), "prepended new active partition");
        self.nudge_flush();
        partition
    }

    /// Rows older than the head's minimum go to the next-older partition
    /// when that one still accepts writes; otherwise they are dropped.
    /// In practice only the head is ever active, so arrivals that precede
    /// it are almost always past saving.
    fn route_outdated(&self, head: &SharedPartition, outdated: Vec<Row>) {
        let mut iter = self.list.iter();
        let mut previous = None;
        for partition in iter.by_ref() {
            if Arc::ptr_eq(&partition, head) {
                previous = iter.next();
                break;
            }
        }

        match previous {
            Some(p) if p.active() => match p.insert_rows(&outdated) {
                Ok(still_outdated) if !still_outdated.is_empty() => {
                    warn!(
                        count = still_outdated.len(),
                        "dropping rows older than every writable partition"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("failed to reroute outdated rows: {e}"),
            },
            _ => {
                warn!(
                    count = outdated.len(),
                    "dropping outdated rows outside the writable window"
                );
            }
        }
    }

    fn nudge_flush(&self) {
        if let Some(tx) = &self.flush_tx {
            // A full queue means a pass is already pending
            let _ = tx.try_send(FlushSignal::Nudge);
        }
    }

    /// Select one series' points within the half-open range `[start, end)`,
    /// in ascending timestamp order.
    ///
    /// Walks the partitions newest to oldest, collecting from each whose
    /// time range intersects the query. Returns the `NoDataPoints` sentinel
    /// when nothing matched.
    pub fn select_data_points(
        &self,
        metric: &str,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DataPoint>> {
        if metric.is_empty() {
            return Err(StorageError::InvalidArgument("metric must be set".into()));
        }
        if start >= end {
            return Err(StorageError::InvalidArgument(format!(
                "invalid range: start {start} is not before end {end}"
            )));
        }

        let mut chunks: Vec<Vec<DataPoint>> = Vec::new();
        for partition in self.list.iter() {
            if partition.size() == 0 {
                continue;
            }
            if partition.max_timestamp() < start || partition.min_timestamp() >= end {
                continue;
            }
            match partition.select_data_points(metric, labels, start, end) {
                Ok(points) => {
                    if !points.is_empty() {
                        chunks.push(points);
                    }
                }
                Err(StorageError::NoDataPoints) => continue,
                Err(e) => return Err(e),
            }
        }
        if chunks.is_empty() {
            return Err(StorageError::NoDataPoints);
        }

        // Older partitions were visited last; prepend their results
        let total = chunks.iter().map(Vec::len).sum();
        let mut points = Vec::with_capacity(total);
        for chunk in chunks.iter().rev() {
            points.extend_from_slice(chunk);
        }

        // Out-of-order arrivals can open a newer partition that overlaps an
        // older one, in which case concatenation is not enough
        let sorted = points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
        if !sorted {
            points.sort_by_key(|p| p.timestamp);
        }
        Ok(points)
    }

    /// Gracefully shut down: wait for in-flight writers, stop the flush
    /// daemon, persist every memory partition, and remove the WAL.
    ///
    /// Returns the first error encountered; later steps still run.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Every writer that got past the closed check holds a read guard
        let _drain = self.drain.write();
        self.stop_flush_daemon();

        let mut first_error: Option<StorageError> = None;
        if let Some(data_path) = &self.config.data_path {
            // Push every live memory partition out of the writable window
            // so the final pass persists them all
            for _ in 0..self.config.writable_partitions {
                self.list
                    .insert(Arc::new(Partition::Memory(MemoryPartition::new(
                        Arc::new(Wal::Nop),
                        self.config.partition_duration,
                        self.config.timestamp_precision,
                    ))));
            }
            let ctx = FlushContext {
                list: self.list.clone(),
                wal: self.wal.clone(),
                data_path: data_path.clone(),
                writable_partitions: self.config.writable_partitions,
            };
            match flush::flush_partitions(&ctx) {
                Ok(()) => {
                    // Everything is on disk; the log has nothing left to say
                    if let Err(e) = self.wal.remove_all() {
                        warn!("failed to remove WAL directory: {e}");
                        first_error.get_or_insert(e);
                    }
                }
                Err(e) => {
                    // Keep the segments: they are the only copy of whatever
                    // failed to flush, and the next open will replay them
                    warn!("final flush failed, keeping WAL for recovery: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn stop_flush_daemon(&self) {
        if let Some(tx) = &self.flush_tx {
            let _ = tx.send(FlushSignal::Shutdown);
        }
        if let Some(handle) = self.flush_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Storage {
    /// Dropping without `close()` behaves like a crash: the daemon is
    /// stopped but nothing is flushed and the WAL stays on disk for the
    /// next open to replay.
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.stop_flush_daemon();
        }
    }
}

/// Open every `p-*` directory under the data path and insert the resulting
/// partitions oldest first, so the newest ends up at the head.
fn open_disk_partitions(data_path: &Path, list: &PartitionList) -> Result<()> {
    let mut partitions = Vec::new();
    for entry in fs::read_dir(data_path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !entry.file_type()?.is_dir() || !name.starts_with(PARTITION_DIR_PREFIX) {
            continue;
        }
        match DiskPartition::open(entry.path()) {
            Ok(partition) => partitions.push(partition),
            Err(StorageError::NoDataPoints) => {
                warn!(partition = %name, "skipping empty disk partition");
            }
            Err(e) => return Err(e),
        }
    }
    partitions.sort_by_key(|p| p.min_timestamp());

    let count = partitions.len();
    for partition in partitions {
        list.insert(Arc::new(Partition::Disk(partition)));
    }
    if count > 0 {
        info!(count, "opened existing disk partitions");
    }
    Ok(())
}

/// Read every WAL segment up front, oldest first. Corruption stops the scan:
/// the damaged segment keeps its records up to the bad byte, and anything
/// after it is lost, but the engine still starts.
fn read_wal_segments(wal_dir: &Path) -> Result<Vec<Vec<crate::wal::WalRecord>>> {
    let reader = WalReader::open(wal_dir)?;
    let mut segments = Vec::new();
    for path in reader.segments() {
        let mut segment = SegmentReader::open(path)?;
        let mut records = Vec::new();
        while let Some(record) = segment.next() {
            records.push(record);
        }
        let corrupted = segment.error().is_some();
        if let Some(e) = segment.into_error() {
            warn!(segment = %path.display(), "WAL replay halted: {e}");
        }
        segments.push(records);
        if corrupted {
            break;
        }
    }
    Ok(segments)
}

/// Rebuild one fresh memory partition per non-empty segment, newest ending
/// nearest the head. Replay bypasses the WAL: the records are already on
/// disk, and their segments are only removed once the partition they fed
/// has been flushed.
fn replay_segments(
    segments: Vec<Vec<crate::wal::WalRecord>>,
    wal: &Arc<Wal>,
    config: &StorageConfig,
    list: &PartitionList,
) {
    let mut recovered = 0usize;
    let mut partitions = 0usize;
    for records in segments {
        if records.is_empty() {
            continue;
        }
        let partition = MemoryPartition::new(
            wal.clone(),
            config.partition_duration,
            config.timestamp_precision,
        );
        recovered += records.len();
        partition.replay_segment(&records);
        list.insert(Arc::new(Partition::Memory(partition)));
        partitions += 1;
    }
    if recovered > 0 {
        info!(
            records = recovered,
            partitions, "recovered unflushed rows from the WAL"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimestampPrecision;
    use std::time::Duration;

    fn in_memory() -> Storage {
        Storage::new(StorageConfig::default()).unwrap()
    }

    fn row(metric: &str, ts: i64, value: f64) -> Row {
        Row::new(metric, DataPoint::new(ts, value))
    }

    #[test]
    fn test_insert_then_select() {
        let storage = in_memory();
        storage
            .insert_rows(&[row("metric1", 1600000000, 0.1)])
            .unwrap();

        let points = storage
            .select_data_points("metric1", &[], 1600000000, 1600000001)
            .unwrap();
        assert_eq!(points, vec![DataPoint::new(1600000000, 0.1)]);
        storage.close().unwrap();
    }

    #[test]
    fn test_invalid_arguments() {
        let storage = in_memory();
        assert!(matches!(
            storage.insert_rows(&[]),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            storage.insert_rows(&[row("", 1, 1.0)]),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            storage.select_data_points("metric1", &[], 10, 10),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            storage.select_data_points("", &[], 0, 10),
            Err(StorageError::InvalidArgument(_))
        ));
        storage.close().unwrap();
    }

    #[test]
    fn test_no_data_points_sentinel() {
        let storage = in_memory();
        storage
            .insert_rows(&[row("metric1", 1600000000, 1.0)])
            .unwrap();

        let err = storage
            .select_data_points("unknown", &[], 0, i64::MAX)
            .unwrap_err();
        assert!(err.is_no_data_points());

        let err = storage
            .select_data_points("metric1", &[], 1, 2)
            .unwrap_err();
        assert!(err.is_no_data_points());
        storage.close().unwrap();
    }

    #[test]
    fn test_out_of_order_hidden_before_flush() {
        let storage = in_memory();
        let rows: Vec<Row> = [1600000000i64, 1600000002, 1600000001, 1600000003]
            .iter()
            .map(|&ts| row("metric1", ts, ts as f64))
            .collect();
        storage.insert_rows(&rows).unwrap();

        let points = storage
            .select_data_points("metric1", &[], 1600000000, 1600000004)
            .unwrap();
        let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![1600000000, 1600000002, 1600000003]);
        storage.close().unwrap();
    }

    #[test]
    fn test_inactive_head_spawns_new_partition() {
        let storage = Storage::new(StorageConfig {
            partition_duration: Duration::from_secs(3),
            timestamp_precision: TimestampPrecision::Seconds,
            ..Default::default()
        })
        .unwrap();

        storage
            .insert_rows(&[row("metric1", 1600000001, 1.0), row("metric1", 1600000004, 2.0)])
            .unwrap();
        assert_eq!(storage.list.len(), 1);

        // The head's span now exceeds the duration, so this insert lands
        // in a newly prepended partition
        storage
            .insert_rows(&[row("metric1", 1600000005, 3.0)])
            .unwrap();
        assert_eq!(storage.list.len(), 2);

        let points = storage
            .select_data_points("metric1", &[], 1600000001, 1600000006)
            .unwrap();
        assert_eq!(points.len(), 3);
        storage.close().unwrap();
    }

    #[test]
    fn test_inserts_across_many_series() {
        let storage = in_memory();
        for i in 0..20 {
            storage
                .insert_rows(&[Row::with_labels(
                    "metric1",
                    vec![Label::new("worker", i.to_string())],
                    DataPoint::new(1600000000 + i, i as f64),
                )])
                .unwrap();
        }

        for i in 0..20 {
            let points = storage
                .select_data_points(
                    "metric1",
                    &[Label::new("worker", i.to_string())],
                    1600000000,
                    1600000100,
                )
                .unwrap();
            assert_eq!(points.len(), 1);
            assert_eq!(points[0].value, i as f64);
        }
        storage.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_writes() {
        let storage = in_memory();
        storage
            .insert_rows(&[row("metric1", 1600000000, 1.0)])
            .unwrap();
        storage.close().unwrap();
        storage.close().unwrap();

        assert!(matches!(
            storage.insert_rows(&[row("metric1", 1600000001, 1.0)]),
            Err(StorageError::InvalidArgument(_))
        ));
    }
}
