//! Segment replay for crash recovery

use super::record::{self, WalOperation, WalRecord};
use crate::error::{Result, StorageError};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Lists the segments of a log directory, oldest first
pub struct WalReader {
    segments: Vec<PathBuf>,
}

impl WalReader {
    /// Scan `dir` for segment files. A missing directory reads as empty.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut segments = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    segments.push(entry.path());
                }
            }
        }
        // Segment names are their creation time in seconds, so the
        // lexicographic order is the replay order.
        segments.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(Self { segments })
    }

    /// Segment paths, oldest first
    pub fn segments(&self) -> &[PathBuf] {
        &self.segments
    }
}

/// Streams the records of one segment file.
///
/// A partial final record (torn by a crash mid-append) reads as a clean
/// end-of-stream; everything before it is still recovered. Any other
/// malformed byte stops the stream and is reported through [`error`].
///
/// [`error`]: SegmentReader::error
pub struct SegmentReader {
    reader: BufReader<File>,
    error: Option<StorageError>,
}

impl SegmentReader {
    /// Open one segment for replay
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            reader: BufReader::new(file),
            error: None,
        })
    }

    /// Read the next record; `None` at end-of-stream or after an error
    pub fn next(&mut self) -> Option<WalRecord> {
        if self.error.is_some() {
            return None;
        }

        let mut op = [0u8; 1];
        match self.reader.read_exact(&mut op) {
            Ok(()) => {}
            // End of segment between records
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return None,
            Err(e) => {
                self.error = Some(e.into());
                return None;
            }
        }

        let result = WalOperation::try_from(op[0])
            .and_then(|_| record::decode_insert(&mut self.reader));
        match result {
            Ok(rec) => Some(rec),
            Err(e) if record::is_truncation(&e) => {
                // Torn tail: the crash interrupted an append
                warn!("WAL segment ends mid-record; earlier records were kept");
                None
            }
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }

    /// The error that stopped the stream, if any
    pub fn error(&self) -> Option<&StorageError> {
        self.error.as_ref()
    }

    /// Take ownership of the stopping error
    pub fn into_error(self) -> Option<StorageError> {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{marshal_series_key, DataPoint};
    use crate::wal::DiskWal;
    use std::io::Write;
    use tempfile::TempDir;

    fn collect(path: &Path) -> (Vec<WalRecord>, Option<StorageError>) {
        let mut reader = SegmentReader::open(path).unwrap();
        let mut records = Vec::new();
        while let Some(rec) = reader.next() {
            records.push(rec);
        }
        let err = reader.into_error();
        (records, err)
    }

    #[test]
    fn test_replay_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("wal");
        let wal = DiskWal::create(&dir, 0).unwrap();

        let key = marshal_series_key("metric1", &[]);
        for i in 0..10 {
            wal.append(&[(key.as_slice(), DataPoint::new(1600000000 + i, i as f64))])
                .unwrap();
        }

        let segments = WalReader::open(&dir).unwrap();
        assert_eq!(segments.segments().len(), 1);

        let (records, err) = collect(&segments.segments()[0]);
        assert!(err.is_none());
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].key, key);
        assert_eq!(records[0].point, DataPoint::new(1600000000, 0.0));
        assert_eq!(records[9].point.timestamp, 1600000009);
    }

    #[test]
    fn test_torn_tail_keeps_earlier_records() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("wal");
        let wal = DiskWal::create(&dir, 0).unwrap();

        let key = marshal_series_key("metric1", &[]);
        for i in 0..5 {
            wal.append(&[(key.as_slice(), DataPoint::new(1600000000 + i, 1.0))])
                .unwrap();
        }

        let segments = WalReader::open(&dir).unwrap();
        let path = segments.segments()[0].clone();
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() - 4]).unwrap();

        let (records, err) = collect(&path);
        assert!(err.is_none());
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn test_unknown_operation_surfaces_corruption() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("segment");
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0xee, 0x01, 0x02]).unwrap();

        let (records, err) = collect(&path);
        assert!(records.is_empty());
        assert!(err.unwrap().is_corruption());
    }

    #[test]
    fn test_missing_directory_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let reader = WalReader::open(tmp.path().join("nope")).unwrap();
        assert!(reader.segments().is_empty());
    }
}
