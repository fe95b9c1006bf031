//! Segmented append writer

use super::record;
use crate::error::Result;
use crate::types::DataPoint;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Disk-backed write-ahead log: a directory of append-only segment files,
/// one per memory partition, named by their creation time in Unix seconds.
pub struct DiskWal {
    dir: PathBuf,
    buffered_size: usize,
    inner: Mutex<BufWriter<File>>,
}

impl DiskWal {
    /// Create the log directory (if needed) and open a fresh active segment.
    ///
    /// `buffered_size` sizes the writer buffer; zero flushes every append.
    pub fn create(dir: impl Into<PathBuf>, buffered_size: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let file = open_segment(&dir)?;
        Ok(Self {
            dir,
            buffered_size,
            inner: Mutex::new(BufWriter::with_capacity(buffered_size, file)),
        })
    }

    /// Append one insert record per entry to the active segment
    pub fn append(&self, entries: &[(&[u8], DataPoint)]) -> Result<()> {
        let mut buf = Vec::with_capacity(entries.len() * 32);
        for (key, point) in entries {
            record::encode_insert(&mut buf, key, point);
        }

        let mut writer = self.inner.lock();
        writer.write_all(&buf)?;
        if self.buffered_size == 0 {
            writer.flush()?;
        }
        Ok(())
    }

    /// Force buffered records down to the segment file
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().flush()?;
        Ok(())
    }

    /// Close the active segment and start a new one
    pub fn rotate(&self) -> Result<()> {
        let mut writer = self.inner.lock();
        writer.flush()?;
        let file = open_segment(&self.dir)?;
        *writer = BufWriter::with_capacity(self.buffered_size, file);
        Ok(())
    }

    /// Remove the lexicographically smallest segment file, if any.
    /// Called after its memory partition was flushed to disk.
    pub fn truncate_oldest(&self) -> Result<()> {
        let _guard = self.inner.lock();
        if let Some(path) = oldest_segment(&self.dir)? {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Flush and delete the whole log directory. Used on clean shutdown,
    /// once every partition has been persisted.
    pub fn remove_all(&self) -> Result<()> {
        let mut writer = self.inner.lock();
        writer.flush()?;
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

/// Segments are named by their creation time in Unix seconds, keeping the
/// lexicographic directory order equal to the creation order. A rotation
/// within the same second gets an ordered `.NNN` suffix so that every
/// partition still maps to its own segment file.
fn open_segment(dir: &Path) -> Result<File> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut name = now.to_string();
    let mut attempt = 0u32;
    loop {
        match OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(dir.join(&name))
        {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                attempt += 1;
                name = format!("{now}.{attempt:03}");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn oldest_segment(dir: &Path) -> Result<Option<PathBuf>> {
    let mut oldest: Option<(String, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if oldest.as_ref().map_or(true, |(n, _)| name < *n) {
            oldest = Some((name, entry.path()));
        }
    }
    Ok(oldest.map(|(_, path)| path))
}
