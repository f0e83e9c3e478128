//! Engine wiring
//!
//! Builds the shared registry, both protocol handlers, the background
//! processors and the server from one [`EngineConfig`], and runs them all
//! under a single shutdown token:
//!
//! ```text
//!                       ┌─► "IOTM" TelemetryHandler ──► data queue ──► data processor ──► ReadingLog
//!  Server ─► Dispatcher ┤                         └──► cmd queue  ──► command processor
//!                       └─► "STRM" StreamingController
//!
//!  StatsAggregator ─► registry sweep/evict + session snapshot, every interval
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::protocol::ProtocolId;
use crate::registry::{Entity, EntityRegistry};
use crate::server::{ProtocolDispatcher, Server, StreamHandler};
use crate::stats::{SessionStats, StatsAggregator};
use crate::streaming::StreamingController;
use crate::telemetry::{
    spawn_data_processor, CommandOutcome, CommandProcessor, ReadingLog, TelemetryCounters,
    TelemetryHandler, TelemetryQueues,
};
use crate::transport::Transport;

/// A fully wired protocol engine
pub struct Engine {
    config: EngineConfig,
    registry: Arc<EntityRegistry>,
    streaming: Arc<StreamingController>,
    telemetry: Arc<TelemetryCounters>,
    readings: ReadingLog,
    commands: Arc<CommandProcessor>,
    aggregator: Arc<StatsAggregator>,
    server: Server,
    queues: Mutex<Option<TelemetryQueues>>,
}

impl Engine {
    /// Build an engine serving the telemetry and streaming protocols
    pub fn new(config: EngineConfig) -> Self {
        Self::with_handlers(config, Vec::new())
    }

    /// Build an engine with additional protocol handlers
    ///
    /// Extra handlers registered under the built-in identifiers replace them.
    pub fn with_handlers(
        config: EngineConfig,
        extra: Vec<(ProtocolId, Arc<dyn StreamHandler>)>,
    ) -> Self {
        let registry = Arc::new(EntityRegistry::with_config(config.registry.clone()));

        let (telemetry_handler, queues) =
            TelemetryHandler::new(config.telemetry.clone(), Arc::clone(&registry));
        let telemetry = telemetry_handler.counters();
        let streaming = Arc::new(StreamingController::new(
            config.streaming.clone(),
            Arc::clone(&registry),
        ));

        let mut dispatcher = ProtocolDispatcher::new();
        dispatcher.register_handler(ProtocolId::TELEMETRY, Arc::new(telemetry_handler));
        let streaming_handler = Arc::clone(&streaming) as Arc<dyn StreamHandler>;
        dispatcher.register_handler(ProtocolId::STREAMING, streaming_handler);
        for (id, handler) in extra {
            dispatcher.register_handler(id, handler);
        }

        let aggregator = Arc::new(
            StatsAggregator::new(config.stats.clone(), Arc::clone(&registry))
                .with_streaming(Arc::clone(&streaming))
                .with_telemetry(Arc::clone(&telemetry)),
        );

        Self {
            readings: ReadingLog::new(config.telemetry.reading_retention),
            commands: Arc::new(CommandProcessor::new(Arc::clone(&registry))),
            server: Server::new(config.server.clone(), dispatcher),
            queues: Mutex::new(Some(queues)),
            config,
            registry,
            streaming,
            telemetry,
            aggregator,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn streaming(&self) -> &Arc<StreamingController> {
        &self.streaming
    }

    pub fn aggregator(&self) -> &Arc<StatsAggregator> {
        &self.aggregator
    }

    pub fn telemetry_counters(&self) -> &Arc<TelemetryCounters> {
        &self.telemetry
    }

    /// Recent readings stored by the data processor
    pub fn readings(&self) -> &ReadingLog {
        &self.readings
    }

    /// Outcomes of commands executed by the command processor
    pub fn command_outcomes(&self) -> broadcast::Receiver<CommandOutcome> {
        self.commands.subscribe()
    }

    /// Snapshot of every known entity
    pub async fn entities(&self) -> Vec<Entity> {
        self.registry.list().await
    }

    /// Snapshot of known devices
    pub async fn devices(&self) -> Vec<Entity> {
        self.registry.devices().await
    }

    pub async fn active_sessions(&self) -> HashMap<String, SessionStats> {
        self.streaming.active_sessions().await
    }

    pub async fn stop_stream(&self, stream_id: &str) -> Result<()> {
        self.streaming.stop_stream(stream_id).await
    }

    /// Run processors, aggregator and server until `shutdown` is cancelled or
    /// the transport closes
    ///
    /// An engine runs once; a second call returns `Error::AlreadyRunning`.
    pub async fn run<T: Transport>(&self, transport: T, shutdown: CancellationToken) -> Result<()> {
        let queues = self.queues.lock().await.take().ok_or(Error::AlreadyRunning)?;

        let background = shutdown.child_token();
        let tasks = [
            spawn_data_processor(queues.data, self.readings.clone(), background.clone()),
            Arc::clone(&self.commands).spawn(queues.commands, background.clone()),
            Arc::clone(&self.aggregator).spawn(background.clone()),
        ];

        let result = self.server.run(transport, shutdown).await;

        background.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }

        tracing::info!("Engine stopped");
        result
    }
}
