//! Immutable memory-mapped disk partition

use crate::compression::GorillaDecoder;
use crate::error::{Result, StorageError};
use crate::types::{marshal_series_key, DataPoint, Label, Timestamp};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Name of the file holding the concatenated per-series streams
pub const DATA_FILE_NAME: &str = "data";

/// Name of the JSON metadata file
pub const META_FILE_NAME: &str = "meta.json";

/// Partition-level metadata, serialized as `meta.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMeta {
    pub min_timestamp: Timestamp,
    pub max_timestamp: Timestamp,
    pub num_data_points: usize,
    /// Hex-encoded series key to the series' placement in the data file
    pub metrics: BTreeMap<String, SeriesMeta>,
}

/// Where one series' stream lives inside the data file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesMeta {
    pub name: String,
    pub offset: u64,
    pub min_timestamp: Timestamp,
    pub max_timestamp: Timestamp,
    pub num_data_points: usize,
}

/// A read-only projection of a flushed memory partition.
///
/// The data file is memory-mapped rather than read onto the heap: the
/// kernel page cache decides what stays resident, and reading one series
/// costs only the decompression of that series' stream.
#[derive(Debug)]
pub struct DiskPartition {
    dir: PathBuf,
    meta: PartitionMeta,
    mmap: Mmap,
}

impl DiskPartition {
    /// Open a partition directory: parse `meta.json` onto the heap and map
    /// the data file read-only. An empty data file yields `NoDataPoints`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        let meta_file = File::open(dir.join(META_FILE_NAME))?;
        let meta: PartitionMeta = serde_json::from_reader(meta_file).map_err(|e| {
            StorageError::Corruption(format!(
                "failed to decode metadata in {}: {e}",
                dir.display()
            ))
        })?;

        let data_file = File::open(dir.join(DATA_FILE_NAME))?;
        if data_file.metadata()?.len() == 0 {
            return Err(StorageError::NoDataPoints);
        }
        // Safety: the file is written once at flush time and never mutated
        // afterwards; the mapping is private and read-only.
        let mmap = unsafe { Mmap::map(&data_file)? };

        Ok(Self { dir, meta, mmap })
    }

    /// Select one series' points within `[start, end)`.
    ///
    /// Seeks straight to the series' offset and decodes at most its point
    /// count; since streams are ascending the scan stops at the first
    /// timestamp past `end`.
    pub fn select_data_points(
        &self,
        metric: &str,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DataPoint>> {
        let key = encode_series_key(&marshal_series_key(metric, labels));
        let series = self
            .meta
            .metrics
            .get(&key)
            .ok_or(StorageError::NoDataPoints)?;

        let offset = series.offset as usize;
        if offset > self.mmap.len() {
            return Err(StorageError::Corruption(format!(
                "series offset {offset} is past the end of {}",
                self.dir.join(DATA_FILE_NAME).display()
            )));
        }

        let mut decoder = GorillaDecoder::new(&self.mmap[offset..], series.num_data_points);
        let mut points = Vec::new();
        while let Some(point) = decoder.next()? {
            if point.timestamp < start {
                continue;
            }
            if point.timestamp >= end {
                break;
            }
            points.push(point);
        }
        Ok(points)
    }

    /// The directory this partition lives in
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn min_timestamp(&self) -> Timestamp {
        self.meta.min_timestamp
    }

    pub fn max_timestamp(&self) -> Timestamp {
        self.meta.max_timestamp
    }

    pub fn size(&self) -> usize {
        self.meta.num_data_points
    }
}

/// Hex-encode a series key so it can live inside a JSON document
pub(crate) fn encode_series_key(key: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(key.len() * 2);
    for &b in key {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0xf) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::GorillaEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_partition(dir: &Path, series: &[(&str, Vec<DataPoint>)]) {
        std::fs::create_dir_all(dir).unwrap();
        let mut data = Vec::new();
        let mut metrics = BTreeMap::new();
        let mut total = 0usize;
        let mut min_t = i64::MAX;
        let mut max_t = i64::MIN;

        for (metric, points) in series {
            let offset = data.len() as u64;
            let mut encoder = GorillaEncoder::new();
            for point in points {
                encoder.encode(point);
            }
            let block = encoder.finish();
            data.extend_from_slice(&block.data);

            let key = encode_series_key(&marshal_series_key(metric, &[]));
            metrics.insert(
                key.clone(),
                SeriesMeta {
                    name: key,
                    offset,
                    min_timestamp: block.start_timestamp,
                    max_timestamp: block.end_timestamp,
                    num_data_points: block.count,
                },
            );
            total += points.len();
            min_t = min_t.min(block.start_timestamp);
            max_t = max_t.max(block.end_timestamp);
        }

        let meta = PartitionMeta {
            min_timestamp: min_t,
            max_timestamp: max_t,
            num_data_points: total,
            metrics,
        };
        let mut data_file = File::create(dir.join(DATA_FILE_NAME)).unwrap();
        data_file.write_all(&data).unwrap();
        let meta_file = File::create(dir.join(META_FILE_NAME)).unwrap();
        serde_json::to_writer_pretty(meta_file, &meta).unwrap();
    }

    fn pt(ts: i64, value: f64) -> DataPoint {
        DataPoint::new(ts, value)
    }

    #[test]
    fn test_open_and_select() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("p-100-300");
        write_partition(
            &dir,
            &[
                ("metric1", vec![pt(100, 0.1), pt(200, 0.2), pt(300, 0.3)]),
                ("metric2", vec![pt(150, 9.9)]),
            ],
        );

        let partition = DiskPartition::open(&dir).unwrap();
        assert_eq!(partition.min_timestamp(), 100);
        assert_eq!(partition.max_timestamp(), 300);
        assert_eq!(partition.size(), 4);

        let points = partition
            .select_data_points("metric1", &[], 100, 300)
            .unwrap();
        assert_eq!(points, vec![pt(100, 0.1), pt(200, 0.2)]);

        let points = partition
            .select_data_points("metric2", &[], 0, i64::MAX)
            .unwrap();
        assert_eq!(points, vec![pt(150, 9.9)]);
    }

    #[test]
    fn test_missing_series_is_no_data_points() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("p-100-100");
        write_partition(&dir, &[("metric1", vec![pt(100, 1.0)])]);

        let partition = DiskPartition::open(&dir).unwrap();
        let err = partition
            .select_data_points("unknown", &[], 0, i64::MAX)
            .unwrap_err();
        assert!(err.is_no_data_points());
    }

    #[test]
    fn test_empty_data_file_is_no_data_points() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("p-0-0");
        std::fs::create_dir_all(&dir).unwrap();
        let meta = PartitionMeta {
            min_timestamp: 0,
            max_timestamp: 0,
            num_data_points: 0,
            metrics: BTreeMap::new(),
        };
        serde_json::to_writer(File::create(dir.join(META_FILE_NAME)).unwrap(), &meta).unwrap();
        File::create(dir.join(DATA_FILE_NAME)).unwrap();

        let err = DiskPartition::open(&dir).unwrap_err();
        assert!(err.is_no_data_points());
    }

    #[test]
    fn test_garbage_meta_is_corruption() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("p-1-1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(META_FILE_NAME), b"{not json").unwrap();
        std::fs::write(dir.join(DATA_FILE_NAME), b"xx").unwrap();

        let err = DiskPartition::open(&dir).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_insert_through_partition_enum_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("p-100-100");
        write_partition(&dir, &[("metric1", vec![pt(100, 1.0)])]);

        let partition = crate::partition::Partition::Disk(DiskPartition::open(&dir).unwrap());
        let err = partition
            .insert_rows(&[crate::Row::new("metric1", pt(101, 1.0))])
            .unwrap_err();
        assert!(matches!(err, StorageError::ImmutableTarget));
    }
}
