//! Chunk payload sources

use bytes::{Bytes, BytesMut};

use crate::ladder::QualityTier;

/// Supplies chunk payloads to a streaming session
pub trait ChunkSource: Send + Sync + 'static {
    /// Produce the payload for chunk `sequence` of `stream_id`
    ///
    /// `size` is the byte budget for the tier; sources should return exactly
    /// that many bytes unless they have less media available.
    fn payload(&self, stream_id: &str, sequence: u64, tier: &QualityTier, size: usize) -> Bytes;
}

/// Deterministic filler: byte `i` of every chunk is `i % 256`
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternSource;

impl ChunkSource for PatternSource {
    fn payload(&self, _stream_id: &str, _sequence: u64, _tier: &QualityTier, size: usize) -> Bytes {
        let mut buf = BytesMut::with_capacity(size);
        buf.extend((0..size).map(|i| (i % 256) as u8));
        buf.freeze()
    }
}
