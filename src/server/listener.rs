//! Server accept loop
//!
//! Accepts connections from a transport and runs one task per connection.
//! Each connection task accepts logical streams and hands them to the
//! dispatcher, which runs one task per stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelContext;
use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::dispatcher::ProtocolDispatcher;
use crate::transport::{Connection, Transport};

/// Multiplexing server
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<ProtocolDispatcher>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Server {
    /// Create a server that routes streams through `dispatcher`
    pub fn new(config: ServerConfig, mut dispatcher: ProtocolDispatcher) -> Self {
        dispatcher.set_identifier_timeout(config.identifier_timeout);

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<ProtocolDispatcher> {
        &self.dispatcher
    }

    /// Run the accept loop until `shutdown` is cancelled or the transport
    /// stops accepting
    ///
    /// Cancelling `shutdown` also reaches every connection and stream task.
    pub async fn run<T: Transport>(
        &self,
        mut transport: T,
        shutdown: CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            protocols = ?self.dispatcher.protocols(),
            max_connections = self.config.max_connections,
            "Server accepting connections"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                accepted = transport.accept_connection() => accepted,
            };

            match accepted {
                Ok(Some(connection)) => self.handle_connection(connection, &shutdown),
                Ok(None) => {
                    tracing::info!("Transport closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }

        Ok(())
    }

    fn handle_connection<C: Connection>(&self, connection: C, shutdown: &CancellationToken) {
        let peer = connection.remote_addr();

        // Check connection limit
        let permit = match self.connection_semaphore {
            Some(ref sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = ?peer, "Connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(connection_id, peer = ?peer, "New connection");

        let dispatcher = Arc::clone(&self.dispatcher);
        let cancel = shutdown.child_token();

        tokio::spawn(serve_connection(connection, connection_id, peer, dispatcher, cancel, permit));
    }
}

async fn serve_connection<C: Connection>(
    mut connection: C,
    connection_id: u64,
    peer: Option<SocketAddr>,
    dispatcher: Arc<ProtocolDispatcher>,
    cancel: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let mut next_stream_id = 0u64;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = connection.accept_stream() => accepted,
        };

        match accepted {
            Ok(Some(stream)) => {
                let ctx =
                    ChannelContext::new(connection_id, next_stream_id, peer, cancel.child_token());
                next_stream_id += 1;
                dispatcher.spawn(stream, ctx);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(connection_id, error = %e, "Connection error");
                break;
            }
        }
    }

    tracing::info!(connection_id, streams = next_stream_id, "Connection closed");
}
