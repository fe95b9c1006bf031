//! Time-bounded partitions and the list that routes across them
//!
//! A partition is a fully independent shard of the database covering one
//! timestamp range. Fresh data lands in a memory partition; once its time
//! span exceeds the configured duration it becomes inactive, and the flush
//! daemon materializes it as an immutable disk partition in place.

mod disk;
mod list;
mod memory;
mod series;

pub use disk::{DiskPartition, PartitionMeta, SeriesMeta, DATA_FILE_NAME, META_FILE_NAME};
pub(crate) use disk::encode_series_key;
pub use list::{PartitionIter, PartitionList};
pub use memory::MemoryPartition;
pub use series::SeriesBuffer;

use crate::error::{Result, StorageError};
use crate::types::{DataPoint, Label, Row, Timestamp};
use std::sync::Arc;

/// A partition variant: writable memory or immutable disk
pub enum Partition {
    Memory(MemoryPartition),
    Disk(DiskPartition),
}

/// Shared handle to a partition in the list
pub type SharedPartition = Arc<Partition>;

impl Partition {
    /// Insert rows, returning the ones older than the partition's minimum
    /// timestamp for the caller to deal with. Disk partitions reject all
    /// inserts.
    pub fn insert_rows(&self, rows: &[Row]) -> Result<Vec<Row>> {
        match self {
            Partition::Memory(p) => p.insert_rows(rows),
            Partition::Disk(_) => Err(StorageError::ImmutableTarget),
        }
    }

    /// Select one series' points within `[start, end)`
    pub fn select_data_points(
        &self,
        metric: &str,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DataPoint>> {
        match self {
            Partition::Memory(p) => p.select_data_points(metric, labels, start, end),
            Partition::Disk(p) => p.select_data_points(metric, labels, start, end),
        }
    }

    /// Smallest timestamp the partition holds
    pub fn min_timestamp(&self) -> Timestamp {
        match self {
            Partition::Memory(p) => p.min_timestamp(),
            Partition::Disk(p) => p.min_timestamp(),
        }
    }

    /// Largest timestamp the partition holds
    pub fn max_timestamp(&self) -> Timestamp {
        match self {
            Partition::Memory(p) => p.max_timestamp(),
            Partition::Disk(p) => p.max_timestamp(),
        }
    }

    /// Number of data points the partition holds
    pub fn size(&self) -> usize {
        match self {
            Partition::Memory(p) => p.size(),
            Partition::Disk(p) => p.size(),
        }
    }

    /// Whether the partition still accepts fresh inserts on its fast path.
    /// Disk partitions never do.
    pub fn active(&self) -> bool {
        match self {
            Partition::Memory(p) => p.active(),
            Partition::Disk(_) => false,
        }
    }

    /// Access the memory variant, if this is one
    pub fn as_memory(&self) -> Option<&MemoryPartition> {
        match self {
            Partition::Memory(p) => Some(p),
            Partition::Disk(_) => None,
        }
    }
}
