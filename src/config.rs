//! Aggregate engine configuration

use serde::{Deserialize, Serialize};

use crate::registry::RegistryConfig;
use crate::server::ServerConfig;
use crate::stats::AggregatorConfig;
use crate::streaming::StreamingConfig;
use crate::telemetry::TelemetryConfig;

/// Every component's settings in one place
///
/// Missing sections fall back to their defaults, so an external loader can
/// deserialize partial documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub telemetry: TelemetryConfig,
    pub streaming: StreamingConfig,
    pub stats: AggregatorConfig,
}
