//! Telemetry channel handler
//!
//! Serves one logical stream of newline-delimited JSON envelopes. Each
//! envelope refreshes the sender's registry record and, depending on its
//! type, is queued for a processor task and/or answered:
//!
//! ```text
//!   heartbeat ──► register/touch ─────────────────────────► "alive"
//!   data      ──► stamp + touch ──► try_send(data queue) ──► drop | "received"/"rejected"
//!   command   ──► touch ──────────► try_send(cmd queue) ───► "received" | "rejected"
//!   response  ──► touch
//! ```
//!
//! Queue pushes never block the read loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::{Framed, LinesCodec};

use super::config::TelemetryConfig;
use super::envelope::{Envelope, EnvelopeKind, HeartbeatInfo, Reliability, ResponseStatus};
use crate::channel::ChannelContext;
use crate::error::{Error, Result};
use crate::registry::{EntityRegistry, RegistryError};
use crate::server::handler::{BoxFuture, StreamHandler};
use crate::transport::BoxedStream;

/// Receiving ends of the telemetry queues
#[derive(Debug)]
pub struct TelemetryQueues {
    pub data: mpsc::Receiver<Envelope>,
    pub commands: mpsc::Receiver<Envelope>,
}

/// Telemetry counters shared by every telemetry stream
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    envelopes: AtomicU64,
    heartbeats: AtomicU64,
    data_queued: AtomicU64,
    data_dropped: AtomicU64,
    commands_queued: AtomicU64,
    commands_rejected: AtomicU64,
    decode_errors: AtomicU64,
}

/// Point-in-time copy of [`TelemetryCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub envelopes: u64,
    pub heartbeats: u64,
    pub data_queued: u64,
    pub data_dropped: u64,
    pub commands_queued: u64,
    pub commands_rejected: u64,
    pub decode_errors: u64,
}

impl TelemetryCounters {
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            envelopes: self.envelopes.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            data_queued: self.data_queued.load(Ordering::Relaxed),
            data_dropped: self.data_dropped.load(Ordering::Relaxed),
            commands_queued: self.commands_queued.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Handler for telemetry streams
pub struct TelemetryHandler {
    config: TelemetryConfig,
    registry: Arc<EntityRegistry>,
    data_tx: mpsc::Sender<Envelope>,
    command_tx: mpsc::Sender<Envelope>,
    counters: Arc<TelemetryCounters>,
}

impl TelemetryHandler {
    /// Create a handler and the queues it feeds
    pub fn new(config: TelemetryConfig, registry: Arc<EntityRegistry>) -> (Self, TelemetryQueues) {
        let (data_tx, data) = mpsc::channel(config.data_queue_capacity.max(1));
        let (command_tx, commands) = mpsc::channel(config.command_queue_capacity.max(1));

        let handler = Self {
            config,
            registry,
            data_tx,
            command_tx,
            counters: Arc::new(TelemetryCounters::default()),
        };

        (handler, TelemetryQueues { data, commands })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn counters(&self) -> Arc<TelemetryCounters> {
        Arc::clone(&self.counters)
    }

    /// Serve one telemetry stream until EOF, cancellation or a decode error
    pub async fn run<S>(&self, stream: S, mut ctx: ChannelContext) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let codec = LinesCodec::new_with_max_length(self.config.max_envelope_len);
        let mut framed = Framed::new(stream, codec);

        ctx.state.start_loop();
        tracing::debug!(
            connection_id = ctx.connection_id,
            stream_id = ctx.stream_id,
            "Telemetry stream started"
        );

        let result = loop {
            let line = tokio::select! {
                _ = ctx.cancel.cancelled() => break Ok(()),
                line = framed.next() => line,
            };

            let line = match line {
                Some(Ok(line)) => line,
                Some(Err(e)) => break Err(Error::from(e)),
                None => break Ok(()),
            };

            if line.trim().is_empty() {
                continue;
            }

            let envelope: Envelope = match serde_json::from_str(&line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    TelemetryCounters::bump(&self.counters.decode_errors);
                    tracing::warn!(
                        connection_id = ctx.connection_id,
                        stream_id = ctx.stream_id,
                        error = %e,
                        "Malformed envelope, closing stream"
                    );
                    break Err(Error::from(e));
                }
            };
            ctx.state.on_message();

            if let Some(response) = self.process(envelope).await {
                let line = match serde_json::to_string(&response) {
                    Ok(line) => line,
                    Err(e) => break Err(Error::from(e)),
                };
                let sent = tokio::select! {
                    _ = ctx.cancel.cancelled() => break Ok(()),
                    sent = framed.send(line) => sent,
                };
                if let Err(e) = sent {
                    break Err(Error::from(e));
                }
            }
        };

        ctx.state.close();
        tracing::debug!(
            connection_id = ctx.connection_id,
            stream_id = ctx.stream_id,
            messages = ctx.state.messages(),
            "Telemetry stream closed"
        );
        result
    }

    /// Apply one envelope, returning the response to send, if any
    pub async fn process(&self, mut envelope: Envelope) -> Option<Envelope> {
        TelemetryCounters::bump(&self.counters.envelopes);

        match envelope.kind {
            EnvelopeKind::Heartbeat => {
                TelemetryCounters::bump(&self.counters.heartbeats);
                let info = HeartbeatInfo::from_payload(&envelope.payload);
                self.registry
                    .register(info.into_entity(envelope.entity_id.clone()))
                    .await;
                Some(Envelope::response(envelope.entity_id, ResponseStatus::Alive, None))
            }
            EnvelopeKind::Data => {
                envelope.received_at = Some(Utc::now());
                self.touch(&envelope.entity_id).await;

                let entity_id = envelope.entity_id.clone();
                let reliability = envelope.reliability();
                match self.data_tx.try_send(envelope) {
                    Ok(()) => {
                        TelemetryCounters::bump(&self.counters.data_queued);
                        (reliability == Reliability::AtLeastOnce)
                            .then(|| Envelope::response(entity_id, ResponseStatus::Received, None))
                    }
                    Err(e) => {
                        let dropped = TelemetryCounters::bump(&self.counters.data_dropped);
                        tracing::warn!(
                            entity_id = %entity_id,
                            dropped,
                            "Data queue full, dropping reading"
                        );
                        (reliability == Reliability::AtLeastOnce)
                            .then(|| Self::rejection(entity_id, "data", e))
                    }
                }
            }
            EnvelopeKind::Command => {
                self.touch(&envelope.entity_id).await;

                // Commands are always answered, whatever reliability the client asked for
                let entity_id = envelope.entity_id.clone();
                match self.command_tx.try_send(envelope) {
                    Ok(()) => {
                        TelemetryCounters::bump(&self.counters.commands_queued);
                        Some(Envelope::response(entity_id, ResponseStatus::Received, None))
                    }
                    Err(e) => {
                        let rejected = TelemetryCounters::bump(&self.counters.commands_rejected);
                        tracing::warn!(
                            entity_id = %entity_id,
                            rejected,
                            "Command queue full, rejecting command"
                        );
                        Some(Self::rejection(entity_id, "command", e))
                    }
                }
            }
            EnvelopeKind::Response => {
                self.touch(&envelope.entity_id).await;
                None
            }
        }
    }

    async fn touch(&self, entity_id: &str) {
        if let Err(RegistryError::NotFound(id)) = self.registry.touch(entity_id).await {
            tracing::debug!(entity_id = %id, "Message from unregistered entity");
        }
    }

    fn rejection(entity_id: String, queue: &'static str, err: TrySendError<Envelope>) -> Envelope {
        let reason = match err {
            TrySendError::Full(_) => Error::QueueFull { queue }.to_string(),
            TrySendError::Closed(_) => format!("{queue} queue is closed"),
        };
        Envelope::response(entity_id, ResponseStatus::Rejected, Some(reason))
    }
}

impl StreamHandler for TelemetryHandler {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn handle(&self, stream: BoxedStream, ctx: ChannelContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.run(stream, ctx))
    }
}
