//! Error types for the storage engine

use std::time::Duration;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage engine error kinds
#[derive(Error, Debug)]
pub enum StorageError {
    /// A caller-supplied argument was rejected
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The query matched nothing. A sentinel, not a failure: callers can
    /// distinguish an empty result from infrastructure errors.
    #[error("no data points found")]
    NoDataPoints,

    /// The admission semaphore timed out
    #[error("failed to obtain an ingestion slot within {timeout:?}: all {limit} writers are busy")]
    Overloaded { timeout: Duration, limit: usize },

    /// Insert attempted against an immutable disk partition
    #[error("cannot insert rows into a disk partition")]
    ImmutableTarget,

    /// Underlying filesystem / mmap error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A WAL or data-file record failed decoding
    #[error("corrupted data: {0}")]
    Corruption(String),

    /// A partition list lookup came up empty
    #[error("partition not found in the list")]
    PartitionNotFound,
}

impl StorageError {
    /// True for the "query matched nothing" sentinel
    pub fn is_no_data_points(&self) -> bool {
        matches!(self, StorageError::NoDataPoints)
    }

    /// True when the error indicates on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, StorageError::Corruption(_))
    }
}
