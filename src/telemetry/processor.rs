//! Telemetry processors
//!
//! Background tasks draining the telemetry queues: the data processor keeps
//! a bounded log of recent readings, the command processor executes commands
//! against the registry and publishes their outcomes.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::envelope::{CommandRequest, Envelope};
use crate::registry::EntityRegistry;

/// A stored data reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

impl From<Envelope> for Reading {
    fn from(envelope: Envelope) -> Self {
        Self {
            received_at: envelope.received_at.unwrap_or_else(Utc::now),
            entity_id: envelope.entity_id,
            timestamp: envelope.timestamp,
            payload: envelope.payload,
        }
    }
}

/// Bounded log of the most recent readings
#[derive(Debug, Clone)]
pub struct ReadingLog {
    readings: Arc<RwLock<VecDeque<Reading>>>,
    capacity: usize,
}

impl ReadingLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            readings: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Append a reading, discarding the oldest beyond capacity
    pub async fn push(&self, reading: Reading) {
        let mut readings = self.readings.write().await;
        if readings.len() == self.capacity {
            readings.pop_front();
        }
        readings.push_back(reading);
    }

    /// Up to `limit` most recent readings, oldest first
    ///
    /// A `limit` of zero returns everything retained.
    pub async fn recent(&self, limit: usize) -> Vec<Reading> {
        let readings = self.readings.read().await;
        let limit = if limit == 0 { readings.len() } else { limit.min(readings.len()) };
        readings.iter().skip(readings.len() - limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.readings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.readings.read().await.is_empty()
    }
}

/// Drain the data queue into `log` until cancelled or the queue closes
pub fn spawn_data_processor(
    mut data: mpsc::Receiver<Envelope>,
    log: ReadingLog,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = data.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            tracing::trace!(entity_id = %envelope.entity_id, "Reading stored");
            log.push(Reading::from(envelope)).await;
        }

        tracing::debug!("Data processor stopped");
    })
}

/// Outcome of one executed command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub entity_id: String,
    pub command: String,
    pub success: bool,
    pub message: String,
    pub completed_at: DateTime<Utc>,
}

impl CommandOutcome {
    fn new(entity_id: String, command: String, success: bool, message: impl Into<String>) -> Self {
        Self {
            entity_id,
            command,
            success,
            message: message.into(),
            completed_at: Utc::now(),
        }
    }
}

/// Executes queued commands against known, online entities
pub struct CommandProcessor {
    registry: Arc<EntityRegistry>,
    outcomes: broadcast::Sender<CommandOutcome>,
}

impl CommandProcessor {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        let (outcomes, _) = broadcast::channel(64);
        Self { registry, outcomes }
    }

    /// Subscribe to command outcomes
    pub fn subscribe(&self) -> broadcast::Receiver<CommandOutcome> {
        self.outcomes.subscribe()
    }

    /// Execute one command envelope
    pub async fn execute(&self, envelope: Envelope) -> CommandOutcome {
        let entity_id = envelope.entity_id;
        let request: CommandRequest = match serde_json::from_value(envelope.payload) {
            Ok(request) => request,
            Err(e) => {
                let message = format!("malformed command: {e}");
                return CommandOutcome::new(entity_id, String::new(), false, message);
            }
        };
        let command = request.command;

        let entity = match self.registry.get(&entity_id).await {
            Ok(entity) => entity,
            Err(_) => return CommandOutcome::new(entity_id, command, false, "device not found"),
        };
        if !entity.online {
            return CommandOutcome::new(entity_id, command, false, "device offline");
        }

        let message = match command.as_str() {
            "read_sensor" => "sensor reading initiated",
            "set_threshold" => "threshold updated",
            "calibrate" => "calibration started",
            "restart" => "device restart initiated",
            _ => {
                let message = format!("unknown command: {command}");
                return CommandOutcome::new(entity_id, command, false, message);
            }
        };

        CommandOutcome::new(entity_id, command, true, message)
    }

    /// Drain the command queue until cancelled or the queue closes
    pub fn spawn(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<Envelope>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = cancel.cancelled() => break,
                    envelope = commands.recv() => match envelope {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };

                let outcome = self.execute(envelope).await;
                if outcome.success {
                    tracing::info!(
                        entity_id = %outcome.entity_id,
                        command = %outcome.command,
                        "Command executed"
                    );
                } else {
                    tracing::warn!(
                        entity_id = %outcome.entity_id,
                        command = %outcome.command,
                        reason = %outcome.message,
                        "Command failed"
                    );
                }

                // No subscribers is fine
                let _ = self.outcomes.send(outcome);
            }

            tracing::debug!("Command processor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::registry::{Entity, EntityKind};
    use crate::telemetry::envelope::EnvelopeKind;

    fn reading(i: u64) -> Reading {
        Reading::from(Envelope::new(EnvelopeKind::Data, "s1", json!({ "value": i })))
    }

    #[tokio::test]
    async fn test_reading_log_is_bounded() {
        let log = ReadingLog::new(3);
        for i in 0..5 {
            log.push(reading(i)).await;
        }

        assert_eq!(log.len().await, 3);
        let recent = log.recent(2).await;
        assert_eq!(recent[0].payload, json!({"value": 3}));
        assert_eq!(recent[1].payload, json!({"value": 4}));
        assert_eq!(log.recent(0).await.len(), 3);
        assert_eq!(log.recent(100).await.len(), 3);
    }

    #[tokio::test]
    async fn test_data_processor_drains_queue() {
        let (tx, rx) = mpsc::channel(8);
        let log = ReadingLog::new(10);
        let cancel = CancellationToken::new();
        let task = spawn_data_processor(rx, log.clone(), cancel.clone());

        tx.send(Envelope::new(EnvelopeKind::Data, "s1", json!(1))).await.unwrap();
        tx.send(Envelope::new(EnvelopeKind::Data, "s1", json!(2))).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_command_outcomes() {
        let registry = Arc::new(EntityRegistry::new());
        registry.register(Entity::new("t1", EntityKind::Temperature)).await;
        let processor = CommandProcessor::new(Arc::clone(&registry));

        let cmd = |id: &str, name: &str| {
            Envelope::new(EnvelopeKind::Command, id, json!({ "command": name }))
        };

        let ok = processor.execute(cmd("t1", "calibrate")).await;
        assert!(ok.success);

        let unknown = processor.execute(cmd("t1", "self_destruct")).await;
        assert!(!unknown.success);
        assert!(unknown.message.contains("unknown command"));

        let missing = processor.execute(cmd("nope", "restart")).await;
        assert_eq!(missing.message, "device not found");

        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.sweep(Duration::ZERO).await;
        let offline = processor.execute(cmd("t1", "restart")).await;
        assert_eq!(offline.message, "device offline");
    }

    #[tokio::test]
    async fn test_command_processor_publishes() {
        let registry = Arc::new(EntityRegistry::new());
        registry.register(Entity::new("t1", EntityKind::Temperature)).await;
        let processor = Arc::new(CommandProcessor::new(registry));
        let mut outcomes = processor.subscribe();

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = Arc::clone(&processor).spawn(rx, cancel.clone());

        tx.send(Envelope::new(EnvelopeKind::Command, "t1", json!({"command": "read_sensor"})))
            .await
            .unwrap();

        let outcome = outcomes.recv().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.command, "read_sensor");

        cancel.cancel();
        task.await.unwrap();
    }
}
