//! Error types
//!
//! Every failure in the engine is local to the logical stream (or session)
//! that produced it. The dispatcher and the connection loop log these errors
//! and keep going; nothing here is meant to take the process down.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::ladder::LadderError;
use crate::protocol::ProtocolId;
use crate::registry::RegistryError;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Read or write failure on a logical stream
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// No handler registered for the identifier at the head of a stream
    #[error("unknown protocol identifier {0}")]
    UnknownProtocol(ProtocolId),

    /// Protocol identifier was not exactly the fixed width
    #[error(
        "invalid protocol identifier {0:?}: expected {expected} bytes",
        expected = crate::protocol::PROTOCOL_ID_LEN
    )]
    InvalidProtocolId(String),

    /// The stream did not present its identifier in time
    #[error("timed out waiting for protocol identifier")]
    IdentifierTimeout,

    /// Malformed envelope, request or frame
    #[error("decode error: {0}")]
    Decode(String),

    /// No quality tier could be resolved for a streaming request
    #[error("no suitable quality for stream {0}")]
    NoSuitableQuality(String),

    /// Bounded queue could not accept another item
    #[error("{queue} queue is full")]
    QueueFull { queue: &'static str },

    /// A streaming session with this id is already running
    #[error("stream already active: {0}")]
    SessionAlreadyActive(String),

    /// Streaming session lookup miss
    #[error("stream not found: {0}")]
    SessionNotFound(String),

    /// The engine was started twice
    #[error("engine is already running")]
    AlreadyRunning,

    /// Entity registry failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Quality ladder failed validation
    #[error(transparent)]
    Ladder(#[from] LadderError),
}

impl Error {
    /// Whether this error is a lookup miss (`NotFound` outcome)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::SessionNotFound(_) | Error::Registry(RegistryError::NotFound(_))
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<LinesCodecError> for Error {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                Error::Decode("message exceeds maximum length".into())
            }
            LinesCodecError::Io(e) => Error::Io(e),
        }
    }
}
