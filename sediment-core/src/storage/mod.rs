//! Storage orchestration: configuration, routing, flushing

mod engine;
pub(crate) mod flush;

pub use engine::Storage;

use crate::defaults;
use crate::types::TimestampPrecision;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory for persistent data. `None` keeps everything in process
    /// memory and disables the WAL.
    pub data_path: Option<PathBuf>,
    /// Time span a memory partition accepts before becoming inactive
    pub partition_duration: Duration,
    /// Unit of every timestamp passing through this engine instance
    pub timestamp_precision: TimestampPrecision,
    /// Maximum wait for an ingestion slot when all workers are busy
    pub write_timeout: Duration,
    /// WAL writer buffer size in bytes; 0 flushes on every append
    pub wal_buffered_size: usize,
    /// How many of the newest partitions the flush daemon must not touch,
    /// leaving a window that accepts out-of-order arrivals
    pub writable_partitions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            partition_duration: defaults::PARTITION_DURATION,
            timestamp_precision: TimestampPrecision::default(),
            write_timeout: defaults::WRITE_TIMEOUT,
            wal_buffered_size: defaults::WAL_BUFFERED_SIZE,
            writable_partitions: defaults::WRITABLE_PARTITIONS,
        }
    }
}

impl StorageConfig {
    /// Persist data under the given directory
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }
}
