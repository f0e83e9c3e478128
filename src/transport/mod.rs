//! Multiplexed transport abstraction
//!
//! The engine never touches packets. It consumes a transport that yields
//! connections, and connections that yield independent, reliable, ordered
//! byte streams:
//!
//! ```text
//!  Transport ──accept_connection()──► Connection ──accept_stream()──► BoxedStream
//!                                         │                            (AsyncRead +
//!                                         └──accept_stream()──► ...     AsyncWrite)
//! ```
//!
//! `memory` provides an in-process implementation for tests and demos;
//! the `quic` feature adds an adapter over `quinn`.

pub mod memory;
#[cfg(feature = "quic")]
pub mod quic;

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

pub use memory::{
    memory_transport, MemoryClient, MemoryConnection, MemoryConnector, MemoryTransport,
};

/// A logical stream: reliable, ordered, bidirectional bytes
pub trait LogicalStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> LogicalStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased logical stream handed to protocol handlers
pub type BoxedStream = Box<dyn LogicalStream>;

/// One multiplexed connection
pub trait Connection: Send + 'static {
    /// Remote address, if the transport has one
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Wait for the peer to open the next logical stream
    ///
    /// Resolves to `Ok(None)` once the connection is closed.
    fn accept_stream(&mut self) -> impl Future<Output = io::Result<Option<BoxedStream>>> + Send;
}

/// Source of connections
pub trait Transport: Send {
    type Connection: Connection;

    /// Wait for the next connection
    ///
    /// Resolves to `Ok(None)` once the transport stops accepting.
    fn accept_connection(
        &mut self,
    ) -> impl Future<Output = io::Result<Option<Self::Connection>>> + Send;
}
