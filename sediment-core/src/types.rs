//! Core value types and series identity

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix timestamp in the engine's configured precision
pub type Timestamp = i64;

/// Maximum length of a label name; longer names are truncated
const MAX_LABEL_NAME_LEN: usize = 256;

/// Maximum length of a label value; longer values are truncated
const MAX_LABEL_VALUE_LEN: usize = 16 * 1024;

/// A single data point, the smallest unit of time-series data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Unix timestamp in the configured precision. A zero timestamp is
    /// replaced with the current wall clock at insert time.
    pub timestamp: Timestamp,
    /// The sampled value
    pub value: f64,
}

impl DataPoint {
    /// Create a new data point
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// An optional key-value property identifying a series more precisely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    /// Create a new label
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A data point along with the metric identity it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// The unique name of the metric. Must be non-empty.
    pub metric: String,
    /// Optional labels further identifying the series
    pub labels: Vec<Label>,
    /// The sampled point
    pub data_point: DataPoint,
}

impl Row {
    /// Create a row without labels
    pub fn new(metric: impl Into<String>, data_point: DataPoint) -> Self {
        Self {
            metric: metric.into(),
            labels: Vec::new(),
            data_point,
        }
    }

    /// Create a row with labels
    pub fn with_labels(
        metric: impl Into<String>,
        labels: Vec<Label>,
        data_point: DataPoint,
    ) -> Self {
        Self {
            metric: metric.into(),
            labels,
            data_point,
        }
    }
}

/// The unit in which every timestamp in one engine instance is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimestampPrecision {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimestampPrecision {
    /// Convert a wall-clock duration into this precision's units
    pub fn duration_to_units(&self, duration: Duration) -> i64 {
        match self {
            TimestampPrecision::Nanoseconds => duration.as_nanos() as i64,
            TimestampPrecision::Microseconds => duration.as_micros() as i64,
            TimestampPrecision::Milliseconds => duration.as_millis() as i64,
            TimestampPrecision::Seconds => duration.as_secs() as i64,
        }
    }

    /// The current wall clock as a Unix timestamp in this precision
    pub fn now(&self) -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        self.duration_to_units(since_epoch)
    }
}

/// Build the canonical byte key identifying a series.
///
/// The metric is written as `len16 || bytes`, followed by each label as
/// `len16(name) || name || len16(value) || value` with labels sorted
/// ascending by name. Labels with empty values are omitted; over-length
/// names and values are truncated. Two rows with the same key belong to
/// the same series, across partitions and across process restarts.
pub fn marshal_series_key(metric: &str, labels: &[Label]) -> Vec<u8> {
    let metric_bytes = clamp(metric.as_bytes(), u16::MAX as usize);

    let mut sorted: Vec<&Label> = labels.iter().filter(|l| !l.value.is_empty()).collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut size = 2 + metric_bytes.len();
    for label in &sorted {
        size += 4 + label.name.len().min(MAX_LABEL_NAME_LEN)
            + label.value.len().min(MAX_LABEL_VALUE_LEN);
    }

    let mut out = Vec::with_capacity(size);
    out.put_u16(metric_bytes.len() as u16);
    out.put_slice(metric_bytes);
    for label in sorted {
        let name = clamp(label.name.as_bytes(), MAX_LABEL_NAME_LEN);
        let value = clamp(label.value.as_bytes(), MAX_LABEL_VALUE_LEN);
        out.put_u16(name.len() as u16);
        out.put_slice(name);
        out.put_u16(value.len() as u16);
        out.put_slice(value);
    }
    out
}

fn clamp(bytes: &[u8], max: usize) -> &[u8] {
    &bytes[..bytes.len().min(max)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic_under_permutation() {
        let a = vec![
            Label::new("host", "web-1"),
            Label::new("region", "eu-west"),
        ];
        let b = vec![
            Label::new("region", "eu-west"),
            Label::new("host", "web-1"),
        ];
        assert_eq!(
            marshal_series_key("http_requests", &a),
            marshal_series_key("http_requests", &b)
        );
    }

    #[test]
    fn test_key_distinguishes_series() {
        let base = marshal_series_key("cpu", &[Label::new("core", "0")]);
        assert_ne!(base, marshal_series_key("cpu", &[Label::new("core", "1")]));
        assert_ne!(base, marshal_series_key("mem", &[Label::new("core", "0")]));
        assert_ne!(base, marshal_series_key("cpu", &[]));
    }

    #[test]
    fn test_empty_value_labels_are_dropped() {
        let with_empty = vec![Label::new("host", "web-1"), Label::new("rack", "")];
        let without = vec![Label::new("host", "web-1")];
        assert_eq!(
            marshal_series_key("cpu", &with_empty),
            marshal_series_key("cpu", &without)
        );
    }

    #[test]
    fn test_over_length_fields_are_truncated() {
        let long_name = "n".repeat(MAX_LABEL_NAME_LEN + 100);
        let long_value = "v".repeat(MAX_LABEL_VALUE_LEN + 100);
        let key = marshal_series_key("cpu", &[Label::new(long_name.clone(), long_value.clone())]);

        let truncated = marshal_series_key(
            "cpu",
            &[Label::new(
                &long_name[..MAX_LABEL_NAME_LEN],
                &long_value[..MAX_LABEL_VALUE_LEN],
            )],
        );
        assert_eq!(key, truncated);
    }

    #[test]
    fn test_precision_conversions() {
        let d = Duration::from_secs(2);
        assert_eq!(
            TimestampPrecision::Nanoseconds.duration_to_units(d),
            2_000_000_000
        );
        assert_eq!(
            TimestampPrecision::Microseconds.duration_to_units(d),
            2_000_000
        );
        assert_eq!(TimestampPrecision::Milliseconds.duration_to_units(d), 2_000);
        assert_eq!(TimestampPrecision::Seconds.duration_to_units(d), 2);
    }

    #[test]
    fn test_now_is_positive() {
        assert!(TimestampPrecision::Seconds.now() > 0);
        assert!(TimestampPrecision::Nanoseconds.now() > 0);
    }
}
