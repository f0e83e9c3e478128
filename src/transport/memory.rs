//! In-memory multiplexed transport
//!
//! Connections are channels of `tokio::io::duplex` pipes: the client side
//! opens a stream by creating a duplex pair and handing one end to the
//! server-side connection. Used by the test suite and the demo.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;

use super::{BoxedStream, Connection, Transport};

/// Default per-stream pipe capacity
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Create a connected connector/transport pair
///
/// `backlog` bounds connections (and streams per connection) waiting to be
/// accepted.
pub fn memory_transport(backlog: usize) -> (MemoryConnector, MemoryTransport) {
    let (tx, rx) = mpsc::channel(backlog.max(1));
    (
        MemoryConnector {
            tx,
            backlog: backlog.max(1),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        },
        MemoryTransport { incoming: rx },
    )
}

/// Server side: yields accepted connections
#[derive(Debug)]
pub struct MemoryTransport {
    incoming: mpsc::Receiver<MemoryConnection>,
}

/// Client side: opens connections
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    tx: mpsc::Sender<MemoryConnection>,
    backlog: usize,
    pipe_capacity: usize,
}

impl MemoryConnector {
    /// Set the per-stream pipe capacity for new connections
    pub fn pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    /// Open a new connection to the transport
    pub async fn connect(&self) -> io::Result<MemoryClient> {
        let (tx, rx) = mpsc::channel(self.backlog);
        let connection = MemoryConnection {
            streams: rx,
            remote_addr: None,
        };

        self.tx
            .send(connection)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "transport closed"))?;

        Ok(MemoryClient {
            streams: tx,
            pipe_capacity: self.pipe_capacity,
        })
    }
}

/// Client half of an in-memory connection
///
/// Dropping it closes the connection once all pending streams are accepted.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    streams: mpsc::Sender<DuplexStream>,
    pipe_capacity: usize,
}

impl MemoryClient {
    /// Open a new logical stream
    pub async fn open_stream(&self) -> io::Result<DuplexStream> {
        let (client, server) = duplex(self.pipe_capacity);

        self.streams
            .send(server)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionReset, "connection closed"))?;

        Ok(client)
    }
}

/// Server half of an in-memory connection
#[derive(Debug)]
pub struct MemoryConnection {
    streams: mpsc::Receiver<DuplexStream>,
    remote_addr: Option<SocketAddr>,
}

impl Connection for MemoryConnection {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn accept_stream(&mut self) -> impl Future<Output = io::Result<Option<BoxedStream>>> + Send {
        async move {
            Ok(self
                .streams
                .recv()
                .await
                .map(|stream| Box::new(stream) as BoxedStream))
        }
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    fn accept_connection(
        &mut self,
    ) -> impl Future<Output = io::Result<Option<MemoryConnection>>> + Send {
        async move { Ok(self.incoming.recv().await) }
    }
}
