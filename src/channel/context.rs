//! Channel context
//!
//! Context handed to a protocol handler together with the stream it owns.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use super::state::ChannelState;
use crate::protocol::ProtocolId;

/// Context passed to `StreamHandler::handle`
///
/// The cancellation token descends from the server's shutdown token, so
/// server shutdown reaches every handler loop. A connection that stops
/// accepting streams leaves its running streams alone.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    /// Connection the stream belongs to
    pub connection_id: u64,

    /// Stream index within the connection
    pub stream_id: u64,

    /// Remote peer address, if the transport exposes one
    pub peer_addr: Option<SocketAddr>,

    /// Channel lifecycle state
    pub state: ChannelState,

    /// Cancelled on server shutdown, or by the handler for its own session
    pub cancel: CancellationToken,
}

impl ChannelContext {
    /// Create a new context
    pub fn new(
        connection_id: u64,
        stream_id: u64,
        peer_addr: Option<SocketAddr>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection_id,
            stream_id,
            peer_addr,
            state: ChannelState::new(),
            cancel,
        }
    }

    /// Standalone context with a fresh cancellation token
    pub fn detached() -> Self {
        Self::new(0, 0, None, CancellationToken::new())
    }

    /// Protocol selected at dispatch
    pub fn protocol(&self) -> Option<ProtocolId> {
        self.state.protocol()
    }
}
