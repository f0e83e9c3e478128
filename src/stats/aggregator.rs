//! Periodic statistics aggregation
//!
//! Each report drives the registry liveness sweep and retention eviction,
//! then snapshots entity counts, active streaming sessions and telemetry
//! counters. Everything is read through public accessors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::metrics::SessionStats;
use crate::registry::{EntityCounts, EntityRegistry};
use crate::streaming::StreamingController;
use crate::telemetry::{TelemetryCounters, TelemetrySnapshot};

/// Aggregator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Time between reports
    pub interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

impl AggregatorConfig {
    /// Set the report interval (minimum 10ms)
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(10));
        self
    }
}

/// One aggregation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub generated_at: DateTime<Utc>,
    pub entities: EntityCounts,
    /// Entities flipped offline by this pass
    pub newly_offline: usize,
    /// Entities removed by this pass
    pub evicted: usize,
    /// Active sessions by stream id
    pub sessions: BTreeMap<String, SessionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySnapshot>,
}

/// Periodic reporter and registry janitor
pub struct StatsAggregator {
    config: AggregatorConfig,
    registry: Arc<EntityRegistry>,
    streaming: Option<Arc<StreamingController>>,
    telemetry: Option<Arc<TelemetryCounters>>,
    latest: watch::Sender<Option<Arc<StatsReport>>>,
}

impl StatsAggregator {
    pub fn new(config: AggregatorConfig, registry: Arc<EntityRegistry>) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            config,
            registry,
            streaming: None,
            telemetry: None,
            latest,
        }
    }

    /// Include streaming sessions in reports
    pub fn with_streaming(mut self, controller: Arc<StreamingController>) -> Self {
        self.streaming = Some(controller);
        self
    }

    /// Include telemetry counters in reports
    pub fn with_telemetry(mut self, counters: Arc<TelemetryCounters>) -> Self {
        self.telemetry = Some(counters);
        self
    }

    /// Receive every report the background task produces
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<StatsReport>>> {
        self.latest.subscribe()
    }

    /// Run one aggregation pass now
    pub async fn collect(&self) -> StatsReport {
        self.collect_at(Utc::now()).await
    }

    /// Run one aggregation pass against an explicit clock reading
    pub async fn collect_at(&self, now: DateTime<Utc>) -> StatsReport {
        let registry_config = self.registry.config();
        let newly_offline = self
            .registry
            .sweep_at(now, registry_config.heartbeat_timeout)
            .await;
        let evicted = self.registry.evict_at(now, registry_config.retention).await;
        let entities = self.registry.counts().await;

        let sessions = match &self.streaming {
            Some(controller) => controller.active_sessions().await.into_iter().collect(),
            None => BTreeMap::new(),
        };

        StatsReport {
            generated_at: now,
            entities,
            newly_offline,
            evicted,
            sessions,
            telemetry: self.telemetry.as_ref().map(|c| c.snapshot()),
        }
    }

    /// Report every interval until cancelled
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.interval;
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let report = self.collect().await;
                tracing::info!(
                    active_sessions = report.sessions.len(),
                    online_devices = report.entities.online_devices,
                    offline_devices = report.entities.offline_devices,
                    newly_offline = report.newly_offline,
                    evicted = report.evicted,
                    data_dropped = report.telemetry.map(|t| t.data_dropped).unwrap_or(0),
                    "Stats report"
                );
                self.latest.send_replace(Some(Arc::new(report)));
            }

            tracing::debug!("Stats aggregator stopped");
        })
    }
}
