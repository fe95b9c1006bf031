//! Flush daemon: promotes inactive memory partitions to disk

use crate::compression::GorillaEncoder;
use crate::error::{Result, StorageError};
use crate::partition::{
    encode_series_key, DiskPartition, MemoryPartition, Partition, PartitionList, PartitionMeta,
    SeriesMeta, SharedPartition, DATA_FILE_NAME, META_FILE_NAME,
};
use crate::wal::Wal;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the daemon sleeps between unprompted flush passes
const FLUSH_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Messages the engine sends its flush daemon
pub(crate) enum FlushSignal {
    /// A new head partition was prepended; worth checking for work
    Nudge,
    /// Finish the current pass and exit
    Shutdown,
}

/// Everything the daemon needs, shareable across threads
pub(crate) struct FlushContext {
    pub list: Arc<PartitionList>,
    pub wal: Arc<Wal>,
    pub data_path: PathBuf,
    pub writable_partitions: usize,
}

/// Start the daemon thread. It wakes on a periodic tick, on a nudge from
/// the routing path, and on shutdown; shutdown is a completion signal, not
/// a cancellation, so in-progress work always finishes.
pub(crate) fn spawn(ctx: FlushContext, signals: Receiver<FlushSignal>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("sediment-flush".into())
        .spawn(move || loop {
            match signals.recv_timeout(FLUSH_TICK_INTERVAL) {
                Ok(FlushSignal::Nudge) | Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = flush_partitions(&ctx) {
                        warn!("flush pass failed: {e}");
                    }
                }
                Ok(FlushSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })?;
    Ok(handle)
}

/// One flush pass: walk the list, skip the writable window, and materialize
/// every remaining memory partition as a disk partition swapped in place.
///
/// Partitions are processed oldest first so that each post-flush
/// `truncate_oldest` removes the segment belonging to the partition that
/// was just persisted. A failure stops the pass (the partition stays
/// inactive in the list and is retried next cycle) and is returned.
pub(crate) fn flush_partitions(ctx: &FlushContext) -> Result<()> {
    let mut candidates: Vec<SharedPartition> = ctx
        .list
        .iter()
        .skip(ctx.writable_partitions)
        .filter(|p| p.as_memory().is_some())
        .collect();
    candidates.reverse();

    for shared in candidates {
        let memory = shared.as_memory().expect("filtered to memory partitions");

        if memory.size() == 0 {
            // Nothing to persist; drop the partition and its segment
            if let Err(e) = ctx.list.remove(&shared) {
                warn!("failed to drop empty partition: {e}");
            }
            if let Err(e) = ctx.wal.truncate_oldest() {
                warn!("failed to truncate WAL segment: {e}");
            }
            continue;
        }

        let dir = ctx.data_path.join(format!(
            "p-{}-{}",
            memory.min_timestamp(),
            memory.max_timestamp()
        ));
        let disk = match flush_memory_partition(&dir, memory) {
            Ok(disk) => disk,
            Err(e) => {
                warn!(path = %dir.display(), "failed to flush partition: {e}");
                return Err(e);
            }
        };
        let num_points = disk.size();
        if let Err(e) = ctx.list.swap(&shared, Arc::new(Partition::Disk(disk))) {
            warn!("failed to swap flushed partition into the list: {e}");
            return Err(e);
        }
        if let Err(e) = ctx.wal.truncate_oldest() {
            warn!("failed to truncate WAL segment: {e}");
        }
        info!(
            path = %dir.display(),
            num_points, "flushed memory partition to disk"
        );
    }

    Ok(())
}

/// Write one memory partition into `<dir>/{data, meta.json}` and open the
/// result. Every series is collected as a single sorted stream (out-of-order
/// arrivals merge here) and encoded at a recorded offset.
pub(crate) fn flush_memory_partition(
    dir: &Path,
    partition: &MemoryPartition,
) -> Result<DiskPartition> {
    fs::create_dir_all(dir)?;
    let mut data = BufWriter::new(File::create(dir.join(DATA_FILE_NAME))?);

    let mut offset = 0u64;
    let mut metrics = BTreeMap::new();
    for (key, points) in partition.collect_series() {
        if points.is_empty() {
            continue;
        }
        let mut encoder = GorillaEncoder::new();
        for point in &points {
            encoder.encode(point);
        }
        let block = encoder.finish();
        data.write_all(&block.data)?;

        let name = encode_series_key(&key);
        debug!(series = %name, points = block.count, offset, "encoded series stream");
        metrics.insert(
            name.clone(),
            SeriesMeta {
                name,
                offset,
                min_timestamp: block.start_timestamp,
                max_timestamp: block.end_timestamp,
                num_data_points: block.count,
            },
        );
        offset += block.data.len() as u64;
    }
    data.flush()?;

    let meta = PartitionMeta {
        min_timestamp: partition.min_timestamp(),
        max_timestamp: partition.max_timestamp(),
        num_data_points: partition.size(),
        metrics,
    };
    let meta_file = File::create(dir.join(META_FILE_NAME))?;
    serde_json::to_writer_pretty(meta_file, &meta)
        .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    DiskPartition::open(dir)
}
