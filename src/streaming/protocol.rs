//! Streaming wire format
//!
//! After the protocol identifier, the client sends one JSON request line and
//! the server answers with one JSON response line. On acceptance the server
//! then emits framed chunks:
//!
//! ```text
//! +---------------------+----------------------+---------------------+
//! | header length (u32) | JSON ChunkHeader     | payload (size bytes)|
//! | big-endian          |                      |                     |
//! +---------------------+----------------------+---------------------+
//! ```
//!
//! The client may send feedback lines (`{"buffer_health":..,"packet_loss":..}`)
//! back on the same stream at any time.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;
use crate::ladder::{QualityRequest, QualityTier};

/// Width of the header length prefix
pub const HEADER_LEN_PREFIX: usize = 4;

/// Handshake request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub stream_id: String,

    #[serde(default, alias = "quality")]
    pub requested_quality: QualityRequest,

    /// Client buffer target in seconds
    #[serde(default, alias = "buffer_size")]
    pub buffer_seconds: u32,

    #[serde(default, alias = "adaptive_bitrate")]
    pub adaptive: bool,

    /// Registry entity the session belongs to; defaults to the stream id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl StreamRequest {
    pub fn new(stream_id: impl Into<String>, quality: QualityRequest) -> Self {
        Self {
            stream_id: stream_id.into(),
            requested_quality: quality,
            buffer_seconds: 0,
            adaptive: false,
            entity_id: None,
        }
    }

    pub fn adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn entity(&self) -> &str {
        self.entity_id.as_deref().unwrap_or(&self.stream_id)
    }
}

/// Handshake outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Accepted,
    Error,
}

/// Handshake response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResponse {
    pub stream_id: String,
    pub status: StreamStatus,
    pub available_qualities: Vec<QualityTier>,
    pub chunk_duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_quality: Option<QualityTier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-chunk metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub stream_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub quality: QualityTier,
    /// Payload length in bytes
    pub size: usize,
    pub is_keyframe: bool,
    pub duration_ms: u64,
}

/// A chunk header with its payload
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFrame {
    pub header: ChunkHeader,
    pub payload: Bytes,
}

/// Largest payload a decoder accepts unless told otherwise
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 8 * 1024 * 1024;

/// Codec for length-prefixed chunk frames
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    max_header_len: usize,
    max_payload_len: usize,
    pending: Option<ChunkHeader>,
}

impl ChunkCodec {
    pub fn new(max_header_len: usize) -> Self {
        Self {
            max_header_len,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            pending: None,
        }
    }

    /// Refuse frames whose header announces more than `len` payload bytes
    pub fn max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }
}

impl Decoder for ChunkCodec {
    type Item = ChunkFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ChunkFrame>, Error> {
        if self.pending.is_none() {
            if src.len() < HEADER_LEN_PREFIX {
                return Ok(None);
            }

            let header_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if header_len > self.max_header_len {
                return Err(Error::Decode(format!(
                    "chunk header of {header_len} bytes exceeds {} byte limit",
                    self.max_header_len
                )));
            }

            if src.len() < HEADER_LEN_PREFIX + header_len {
                src.reserve(HEADER_LEN_PREFIX + header_len - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LEN_PREFIX);
            let raw = src.split_to(header_len);
            let header: ChunkHeader = serde_json::from_slice(&raw)?;
            if header.size > self.max_payload_len {
                return Err(Error::Decode(format!(
                    "chunk payload of {} bytes exceeds {} byte limit",
                    header.size, self.max_payload_len
                )));
            }
            self.pending = Some(header);
        }

        let size = match &self.pending {
            Some(header) => header.size,
            None => return Ok(None),
        };
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        let payload = src.split_to(size).freeze();
        Ok(self
            .pending
            .take()
            .map(|header| ChunkFrame { header, payload }))
    }
}

impl Encoder<ChunkFrame> for ChunkCodec {
    type Error = Error;

    fn encode(&mut self, frame: ChunkFrame, dst: &mut BytesMut) -> Result<(), Error> {
        let header = serde_json::to_vec(&frame.header)?;
        if header.len() > self.max_header_len {
            return Err(Error::Decode(format!(
                "chunk header of {} bytes exceeds {} byte limit",
                header.len(),
                self.max_header_len
            )));
        }

        dst.reserve(HEADER_LEN_PREFIX + header.len() + frame.payload.len());
        dst.put_u32(header.len() as u32);
        dst.put_slice(&header);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}
