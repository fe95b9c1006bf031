//! Point codec for per-series streams
//!
//! Series streams are compressed with delta-of-delta timestamps and
//! XOR-folded values (the Gorilla scheme). Typical monitoring workloads
//! compress to well under two bytes per point. The only external contract
//! is that `encode ∘ decode` is the identity for any finite series,
//! including a single-point series; decoders must detect truncated input.

mod bitstream;
mod decoder;
mod encoder;

pub use bitstream::{BitReader, BitWriter};
pub use decoder::GorillaDecoder;
pub use encoder::GorillaEncoder;

/// One encoded per-series stream, ready to be appended to a data file
#[derive(Debug, Clone)]
pub struct SeriesBlock {
    /// Compressed bytes
    pub data: Vec<u8>,
    /// Number of points in the stream
    pub count: usize,
    /// Timestamp of the first encoded point
    pub start_timestamp: i64,
    /// Timestamp of the last encoded point
    pub end_timestamp: i64,
}

impl SeriesBlock {
    /// Average encoded size per point
    pub fn bytes_per_point(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.data.len() as f64 / self.count as f64
    }
}
