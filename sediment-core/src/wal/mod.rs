//! Segmented write-ahead log
//!
//! Every insert is appended to the active segment before any in-memory
//! buffer is touched, so a crash loses nothing that was acknowledged.
//! One segment backs one memory partition: the log is rotated whenever a
//! new partition is added, and the oldest segment is removed once its
//! partition has been flushed to disk.

mod reader;
mod record;
mod writer;

pub use reader::{SegmentReader, WalReader};
pub use record::{WalOperation, WalRecord};
pub use writer::DiskWal;

use crate::error::Result;
use crate::types::DataPoint;

/// A write-ahead log handle.
///
/// The `Nop` variant backs in-memory engines: every operation succeeds
/// without touching the filesystem.
pub enum Wal {
    Disk(DiskWal),
    Nop,
}

impl Wal {
    /// Append one insert record per entry to the active segment
    pub fn append(&self, entries: &[(&[u8], DataPoint)]) -> Result<()> {
        match self {
            Wal::Disk(wal) => wal.append(entries),
            Wal::Nop => Ok(()),
        }
    }

    /// Force buffered records down to the segment file
    pub fn flush(&self) -> Result<()> {
        match self {
            Wal::Disk(wal) => wal.flush(),
            Wal::Nop => Ok(()),
        }
    }

    /// Close the active segment and start a new one
    pub fn rotate(&self) -> Result<()> {
        match self {
            Wal::Disk(wal) => wal.rotate(),
            Wal::Nop => Ok(()),
        }
    }

    /// Remove the oldest segment file, if any
    pub fn truncate_oldest(&self) -> Result<()> {
        match self {
            Wal::Disk(wal) => wal.truncate_oldest(),
            Wal::Nop => Ok(()),
        }
    }

    /// Delete the entire log directory
    pub fn remove_all(&self) -> Result<()> {
        match self {
            Wal::Disk(wal) => wal.remove_all(),
            Wal::Nop => Ok(()),
        }
    }
}
