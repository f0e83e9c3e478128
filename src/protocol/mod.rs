//! Protocol identifiers
//!
//! Every logical stream opens with a fixed-width identifier that selects the
//! handler owning the rest of the stream:
//!
//! ```text
//! +----------------+---------------------------------+
//! | protocol id(4) | protocol-specific bytes ...     |
//! +----------------+---------------------------------+
//! ```

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Width of the protocol identifier in bytes
pub const PROTOCOL_ID_LEN: usize = 4;

/// Fixed-width protocol identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolId([u8; PROTOCOL_ID_LEN]);

impl ProtocolId {
    /// Telemetry channel (sensor data, commands, heartbeats)
    pub const TELEMETRY: ProtocolId = ProtocolId(*b"IOTM");

    /// Adaptive video streaming
    pub const STREAMING: ProtocolId = ProtocolId(*b"STRM");

    pub const fn new(bytes: [u8; PROTOCOL_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PROTOCOL_ID_LEN] {
        &self.0
    }

    /// Read exactly one identifier from the head of a stream
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; PROTOCOL_ID_LEN];
        reader.read_exact(&mut buf).await?;
        Ok(Self(buf))
    }
}

impl FromStr for ProtocolId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; PROTOCOL_ID_LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidProtocolId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

impl fmt::Debug for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolId(\"{}\")", self.0.escape_ascii())
    }
}
