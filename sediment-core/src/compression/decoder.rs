//! Stream decoder matching [`GorillaEncoder`](super::GorillaEncoder)

use super::bitstream::BitReader;
use crate::error::{Result, StorageError};
use crate::types::DataPoint;

/// Decodes one series' compressed stream.
///
/// The stream carries no terminator of its own: the caller supplies the
/// point count (from partition metadata), and decoding stops once that many
/// points have been produced. Input ending early is surfaced as corruption.
pub struct GorillaDecoder<'a> {
    bits: BitReader<'a>,
    count: usize,
    decoded: usize,

    prev_timestamp: i64,
    prev_delta: i64,

    prev_value_bits: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl<'a> GorillaDecoder<'a> {
    /// Create a decoder for a stream of `count` points
    pub fn new(data: &'a [u8], count: usize) -> Self {
        Self {
            bits: BitReader::new(data),
            count,
            decoded: 0,
            prev_timestamp: 0,
            prev_delta: 0,
            prev_value_bits: 0,
            prev_leading: 0,
            prev_trailing: 0,
        }
    }

    /// Decode the next point; `Ok(None)` once `count` points were produced
    pub fn next(&mut self) -> Result<Option<DataPoint>> {
        if self.decoded >= self.count {
            return Ok(None);
        }

        let point = if self.decoded == 0 {
            let ts = self.take(64)? as i64;
            let value_bits = self.take(64)?;
            self.prev_timestamp = ts;
            self.prev_value_bits = value_bits;
            DataPoint::new(ts, f64::from_bits(value_bits))
        } else {
            let ts = self.decode_timestamp()?;
            let value = self.decode_value()?;
            DataPoint::new(ts, value)
        };

        self.decoded += 1;
        Ok(Some(point))
    }

    /// Decode every remaining point
    pub fn decode_all(&mut self) -> Result<Vec<DataPoint>> {
        let mut points = Vec::with_capacity(self.count - self.decoded);
        while let Some(point) = self.next()? {
            points.push(point);
        }
        Ok(points)
    }

    fn decode_timestamp(&mut self) -> Result<i64> {
        let dod = if !self.take_bit()? {
            // '0': same delta as before
            0
        } else if !self.take_bit()? {
            // '10': seven bits
            self.take(7)? as i64 - 63
        } else if !self.take_bit()? {
            // '110': nine bits
            self.take(9)? as i64 - 255
        } else if !self.take_bit()? {
            // '1110': twelve bits
            self.take(12)? as i64 - 2047
        } else {
            // '1111': full width
            self.take(64)? as i64
        };

        self.prev_delta += dod;
        self.prev_timestamp += self.prev_delta;
        Ok(self.prev_timestamp)
    }

    fn decode_value(&mut self) -> Result<f64> {
        if !self.take_bit()? {
            return Ok(f64::from_bits(self.prev_value_bits));
        }

        if self.take_bit()? {
            // New window: leading zeros then width minus one
            let leading = self.take(5)? as u32;
            let width = self.take(6)? as u32 + 1;
            if leading + width > 64 {
                return Err(StorageError::Corruption(format!(
                    "invalid value window: {leading} leading zeros with width {width}"
                )));
            }
            self.prev_leading = leading;
            self.prev_trailing = 64 - leading - width;
        }

        let width = 64 - self.prev_leading - self.prev_trailing;
        let meaningful = self.take(width)?;
        self.prev_value_bits ^= meaningful << self.prev_trailing;
        Ok(f64::from_bits(self.prev_value_bits))
    }

    fn take_bit(&mut self) -> Result<bool> {
        self.bits.read_bit().ok_or_else(Self::truncated)
    }

    fn take(&mut self, count: u32) -> Result<u64> {
        self.bits.read_bits(count).ok_or_else(Self::truncated)
    }

    fn truncated() -> StorageError {
        StorageError::Corruption("compressed series stream ended unexpectedly".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::GorillaEncoder;

    fn round_trip(points: &[DataPoint]) -> Vec<DataPoint> {
        let mut encoder = GorillaEncoder::new();
        for point in points {
            encoder.encode(point);
        }
        let block = encoder.finish();
        let mut decoder = GorillaDecoder::new(&block.data, block.count);
        decoder.decode_all().unwrap()
    }

    #[test]
    fn test_single_point_round_trip() {
        let points = vec![DataPoint::new(1600000000, 0.1)];
        assert_eq!(round_trip(&points), points);
    }

    #[test]
    fn test_regular_series_round_trip() {
        let points: Vec<DataPoint> = (0..500)
            .map(|i| DataPoint::new(1600000000 + i * 15, 20.0 + (i as f64 * 0.25).sin()))
            .collect();
        assert_eq!(round_trip(&points), points);
    }

    #[test]
    fn test_irregular_deltas_round_trip() {
        // Exercise every delta-of-delta bucket, including the full-width one
        let timestamps = [
            1600000000i64,
            1600000001,
            1600000002,
            1600000080,
            1600000380,
            1600002500,
            1600500000,
            1600500001,
        ];
        let points: Vec<DataPoint> = timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| DataPoint::new(ts, i as f64 * -3.75))
            .collect();
        assert_eq!(round_trip(&points), points);
    }

    #[test]
    fn test_extreme_values_round_trip() {
        let points = vec![
            DataPoint::new(1600000000, 0.0),
            DataPoint::new(1600000001, f64::MAX),
            DataPoint::new(1600000002, f64::MIN_POSITIVE),
            DataPoint::new(1600000003, -0.0),
            DataPoint::new(1600000004, 1.0),
            DataPoint::new(1600000005, 1.0),
        ];
        assert_eq!(round_trip(&points), points);
    }

    #[test]
    fn test_truncated_stream_is_detected() {
        let mut encoder = GorillaEncoder::new();
        for i in 0..50 {
            encoder.encode(&DataPoint::new(1600000000 + i * 60, 1.5 * i as f64));
        }
        let block = encoder.finish();

        let half = &block.data[..block.data.len() / 2];
        let mut decoder = GorillaDecoder::new(half, block.count);
        let err = decoder.decode_all().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_count_bounds_decoding() {
        // Decoding stops at the supplied count even if more bytes follow
        let mut encoder = GorillaEncoder::new();
        encoder.encode(&DataPoint::new(1600000000, 1.0));
        encoder.encode(&DataPoint::new(1600000010, 2.0));
        let block = encoder.finish();

        let mut decoder = GorillaDecoder::new(&block.data, 1);
        let points = decoder.decode_all().unwrap();
        assert_eq!(points, vec![DataPoint::new(1600000000, 1.0)]);
        assert!(decoder.next().unwrap().is_none());
    }
}
