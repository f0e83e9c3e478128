//! Protocol dispatcher
//!
//! Reads the fixed-width identifier from the head of each logical stream and
//! hands the remainder of the stream to the matching handler:
//!
//! ```text
//!  stream ──► read 4 bytes ──► lookup ──┬─► handler.handle(stream, ctx)
//!                                       └─► unknown: shutdown stream
//! ```
//!
//! The mapping is built before the server starts and is read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::channel::ChannelContext;
use crate::error::{Error, Result};
use crate::protocol::ProtocolId;
use crate::server::handler::StreamHandler;
use crate::transport::BoxedStream;

/// Default time a stream has to present its identifier
pub const DEFAULT_IDENTIFIER_TIMEOUT: Duration = Duration::from_secs(10);

/// Routes logical streams to protocol handlers by identifier
pub struct ProtocolDispatcher {
    handlers: HashMap<ProtocolId, Arc<dyn StreamHandler>>,
    identifier_timeout: Duration,
}

impl ProtocolDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            identifier_timeout: DEFAULT_IDENTIFIER_TIMEOUT,
        }
    }

    /// Set how long a stream may take to send its identifier
    pub fn identifier_timeout(mut self, timeout: Duration) -> Self {
        self.identifier_timeout = timeout;
        self
    }

    pub(crate) fn set_identifier_timeout(&mut self, timeout: Duration) {
        self.identifier_timeout = timeout;
    }

    /// Register a handler, returning the one it replaces
    pub fn register_handler(
        &mut self,
        protocol: ProtocolId,
        handler: Arc<dyn StreamHandler>,
    ) -> Option<Arc<dyn StreamHandler>> {
        tracing::debug!(protocol = %protocol, handler = handler.name(), "Handler registered");
        self.handlers.insert(protocol, handler)
    }

    /// Registered identifiers
    pub fn protocols(&self) -> Vec<ProtocolId> {
        self.handlers.keys().copied().collect()
    }

    /// Read the identifier and run the matching handler to completion
    ///
    /// An unknown identifier shuts the stream down and returns
    /// `Error::UnknownProtocol`; nothing else about the connection changes.
    pub async fn accept(&self, mut stream: BoxedStream, mut ctx: ChannelContext) -> Result<()> {
        let read =
            tokio::time::timeout(self.identifier_timeout, ProtocolId::read_from(&mut stream));

        let protocol = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                ctx.state.close();
                return Ok(());
            }
            result = read => match result {
                Ok(id) => id?,
                Err(_) => {
                    ctx.state.close();
                    return Err(Error::IdentifierTimeout);
                }
            },
        };

        let Some(handler) = self.handlers.get(&protocol).cloned() else {
            tracing::warn!(
                connection_id = ctx.connection_id,
                stream_id = ctx.stream_id,
                protocol = %protocol,
                "Unknown protocol, closing stream"
            );
            ctx.state.close();
            let _ = stream.shutdown().await;
            return Err(Error::UnknownProtocol(protocol));
        };

        ctx.state.dispatch(protocol);
        tracing::debug!(
            connection_id = ctx.connection_id,
            stream_id = ctx.stream_id,
            protocol = %protocol,
            handler = handler.name(),
            "Stream dispatched"
        );

        handler.handle(stream, ctx).await
    }

    /// Run `accept` on its own task
    pub fn spawn(self: &Arc<Self>, stream: BoxedStream, ctx: ChannelContext) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            let connection_id = ctx.connection_id;
            let stream_id = ctx.stream_id;

            match dispatcher.accept(stream, ctx).await {
                Ok(()) => {
                    tracing::debug!(connection_id, stream_id, "Stream closed");
                }
                Err(Error::UnknownProtocol(_)) => {}
                Err(e) => {
                    tracing::debug!(connection_id, stream_id, error = %e, "Stream error");
                }
            }
        })
    }
}

impl Default for ProtocolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    use super::*;
    use crate::channel::ChannelPhase;
    use crate::server::handler::BoxFuture;

    struct Recorder {
        seen: mpsc::UnboundedSender<(ProtocolId, ChannelPhase, Vec<u8>)>,
    }

    impl StreamHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn handle(
            &self,
            mut stream: BoxedStream,
            ctx: ChannelContext,
        ) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                let mut rest = Vec::new();
                stream.read_to_end(&mut rest).await?;
                let _ = self.seen.send((
                    ctx.protocol().unwrap_or(ProtocolId::new(*b"????")),
                    ctx.state.phase(),
                    rest,
                ));
                Ok(())
            })
        }
    }

    type Seen = mpsc::UnboundedReceiver<(ProtocolId, ChannelPhase, Vec<u8>)>;

    fn dispatcher() -> (ProtocolDispatcher, Seen) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut dispatcher = ProtocolDispatcher::new();
        dispatcher.register_handler(ProtocolId::TELEMETRY, Arc::new(Recorder { seen: tx }));
        (dispatcher, rx)
    }

    #[tokio::test]
    async fn test_routes_by_identifier() {
        let (dispatcher, mut seen) = dispatcher();
        let (mut client, server) = duplex(1024);

        client.write_all(b"IOTMhello").await.unwrap();
        client.shutdown().await.unwrap();

        dispatcher
            .accept(Box::new(server), ChannelContext::detached())
            .await
            .unwrap();

        let (protocol, phase, rest) = seen.recv().await.unwrap();
        assert_eq!(protocol, ProtocolId::TELEMETRY);
        assert_eq!(phase, ChannelPhase::Dispatched(ProtocolId::TELEMETRY));
        assert_eq!(rest, b"hello");
    }

    #[tokio::test]
    async fn test_unknown_identifier_closes_stream() {
        let (dispatcher, _seen) = dispatcher();
        let stream = tokio_test::io::Builder::new().read(b"XXXX").build();

        let err = dispatcher
            .accept(Box::new(stream), ChannelContext::detached())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownProtocol(id) if id == ProtocolId::new(*b"XXXX")));
    }

    #[tokio::test]
    async fn test_short_identifier_is_io_error() {
        let (dispatcher, _seen) = dispatcher();
        let (mut client, server) = duplex(16);

        client.write_all(b"IO").await.unwrap();
        drop(client);

        let err = dispatcher
            .accept(Box::new(server), ChannelContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_identifier_timeout() {
        let (dispatcher, _seen) = dispatcher();
        let dispatcher = dispatcher.identifier_timeout(Duration::from_millis(20));
        let (_client, server) = duplex(16);

        let err = dispatcher
            .accept(Box::new(server), ChannelContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentifierTimeout));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_identifier() {
        let (dispatcher, _seen) = dispatcher();
        let (_client, server) = duplex(16);
        let ctx = ChannelContext::detached();
        ctx.cancel.cancel();

        dispatcher.accept(Box::new(server), ctx).await.unwrap();
    }

    #[test]
    fn test_register_replaces() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut dispatcher = ProtocolDispatcher::new();

        assert!(dispatcher
            .register_handler(ProtocolId::STREAMING, Arc::new(Recorder { seen: tx.clone() }))
            .is_none());
        assert!(dispatcher
            .register_handler(ProtocolId::STREAMING, Arc::new(Recorder { seen: tx }))
            .is_some());
        assert_eq!(dispatcher.protocols(), vec![ProtocolId::STREAMING]);
    }
}
