//! Sediment Core - Embeddable Time-Series Storage Engine
//!
//! A local, in-process library that ingests timestamped numeric samples at
//! high rates and serves range queries over them. Recent data is held in
//! memory for fast writes; aged data transitions through a write-ahead log
//! into compact, read-only, memory-mapped on-disk partitions.
//!
//! # Architecture
//!
//! The engine is organized around a time-sharded partition list:
//!
//! - **Memory partition**: concurrent per-series buffers accepting fresh
//!   writes, fed through the WAL
//! - **WAL (Write-Ahead Log)**: segmented append-only log used to recover
//!   unflushed memory partitions after a crash
//! - **Disk partition**: immutable, memory-mapped projection of a flushed
//!   memory partition (Gorilla-compressed per-series streams + JSON metadata)
//! - **Partition list**: newest-first linked list routing every read and
//!   write; a background daemon promotes inactive memory partitions to disk
//!
//! # Example
//!
//! ```no_run
//! use sediment_core::{DataPoint, Row, Storage, StorageConfig};
//!
//! let storage = Storage::new(StorageConfig::default()).unwrap();
//! storage
//!     .insert_rows(&[Row::new("metric1", DataPoint::new(1600000000, 0.1))])
//!     .unwrap();
//! let points = storage
//!     .select_data_points("metric1", &[], 1600000000, 1600000001)
//!     .unwrap();
//! assert_eq!(points.len(), 1);
//! storage.close().unwrap();
//! ```

pub mod compression;
pub mod partition;
pub mod storage;
pub mod wal;

mod error;
mod types;

pub use error::{Result, StorageError};
pub use storage::{Storage, StorageConfig};
pub use types::{marshal_series_key, DataPoint, Label, Row, Timestamp, TimestampPrecision};

/// Sediment version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Time span a memory partition accepts before becoming inactive (1h)
    pub const PARTITION_DURATION: Duration = Duration::from_secs(60 * 60);

    /// Maximum wait for an ingestion slot when all workers are busy
    pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

    /// WAL writer buffer size; 0 flushes on every append
    pub const WAL_BUFFERED_SIZE: usize = 4096;

    /// How many of the newest partitions are excluded from flushing,
    /// leaving room for out-of-order arrivals
    pub const WRITABLE_PARTITIONS: usize = 2;
}
