//! Stream encoder: delta-of-delta timestamps, XOR-folded values

use super::bitstream::BitWriter;
use super::SeriesBlock;
use crate::types::DataPoint;

/// Encodes one series' points into a compressed stream.
///
/// Points must be fed in ascending timestamp order; the flush step merges
/// out-of-order arrivals before encoding, so this holds by construction.
pub struct GorillaEncoder {
    bits: BitWriter,
    count: usize,

    // Timestamp state
    first_timestamp: i64,
    prev_timestamp: i64,
    prev_delta: i64,

    // Value state
    prev_value_bits: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl GorillaEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            bits: BitWriter::with_capacity(1024),
            count: 0,
            first_timestamp: 0,
            prev_timestamp: 0,
            prev_delta: 0,
            prev_value_bits: 0,
            prev_leading: u32::MAX,
            prev_trailing: 0,
        }
    }

    /// Append one point to the stream
    pub fn encode(&mut self, point: &DataPoint) {
        if self.count == 0 {
            // The first record is encoded absolutely
            self.first_timestamp = point.timestamp;
            self.prev_timestamp = point.timestamp;
            self.prev_value_bits = point.value.to_bits();
            self.bits.write_bits(point.timestamp as u64, 64);
            self.bits.write_bits(self.prev_value_bits, 64);
        } else {
            self.encode_timestamp(point.timestamp);
            self.encode_value(point.value);
        }
        self.count += 1;
    }

    /// Number of points encoded so far
    pub fn count(&self) -> usize {
        self.count
    }

    /// Seal the stream and return the compressed block
    pub fn finish(self) -> SeriesBlock {
        SeriesBlock {
            data: self.bits.finish(),
            count: self.count,
            start_timestamp: self.first_timestamp,
            end_timestamp: self.prev_timestamp,
        }
    }

    fn encode_timestamp(&mut self, timestamp: i64) {
        let delta = timestamp - self.prev_timestamp;
        let dod = delta - self.prev_delta;

        // Regular scrapes have a constant interval, so the delta-of-delta
        // is almost always zero and costs one bit.
        match dod {
            0 => self.bits.write_bit(false),
            -63..=64 => {
                self.bits.write_bits(0b10, 2);
                self.bits.write_bits((dod + 63) as u64, 7);
            }
            -255..=256 => {
                self.bits.write_bits(0b110, 3);
                self.bits.write_bits((dod + 255) as u64, 9);
            }
            -2047..=2048 => {
                self.bits.write_bits(0b1110, 4);
                self.bits.write_bits((dod + 2047) as u64, 12);
            }
            _ => {
                self.bits.write_bits(0b1111, 4);
                self.bits.write_bits(dod as u64, 64);
            }
        }

        self.prev_delta = delta;
        self.prev_timestamp = timestamp;
    }

    fn encode_value(&mut self, value: f64) {
        let value_bits = value.to_bits();
        let xor = value_bits ^ self.prev_value_bits;
        self.prev_value_bits = value_bits;

        if xor == 0 {
            self.bits.write_bit(false);
            return;
        }
        self.bits.write_bit(true);

        // The 5-bit leading-zero field caps at 31
        let leading = xor.leading_zeros().min(31);
        let trailing = xor.trailing_zeros();

        if leading >= self.prev_leading && trailing >= self.prev_trailing {
            // Meaningful bits fit the previous window
            self.bits.write_bit(false);
            let width = 64 - self.prev_leading - self.prev_trailing;
            self.bits.write_bits(xor >> self.prev_trailing, width);
        } else {
            self.bits.write_bit(true);
            let width = 64 - leading - trailing;
            self.bits.write_bits(leading as u64, 5);
            // Width is in 1..=64, stored off by one to fit six bits
            self.bits.write_bits((width - 1) as u64, 6);
            self.bits.write_bits(xor >> trailing, width);
            self.prev_leading = leading;
            self.prev_trailing = trailing;
        }
    }
}

impl Default for GorillaEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_point_block() {
        let mut encoder = GorillaEncoder::new();
        encoder.encode(&DataPoint::new(1600000000, 23.5));
        let block = encoder.finish();

        assert_eq!(block.count, 1);
        assert_eq!(block.start_timestamp, 1600000000);
        assert_eq!(block.end_timestamp, 1600000000);
        assert_eq!(block.data.len(), 16);
    }

    #[test]
    fn test_constant_interval_compresses_hard() {
        let mut encoder = GorillaEncoder::new();
        for i in 0..1000 {
            encoder.encode(&DataPoint::new(1600000000 + i * 10, 42.0));
        }
        let block = encoder.finish();

        assert_eq!(block.count, 1000);
        assert_eq!(block.end_timestamp, 1600000000 + 999 * 10);
        // Constant delta and constant value cost two bits per point
        assert!(
            block.bytes_per_point() < 1.0,
            "expected < 1 byte/point, got {}",
            block.bytes_per_point()
        );
    }

    #[test]
    fn test_empty_encoder() {
        let block = GorillaEncoder::new().finish();
        assert_eq!(block.count, 0);
        assert!(block.data.is_empty());
    }
}
