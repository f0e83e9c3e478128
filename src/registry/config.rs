//! Registry configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Liveness and retention settings for the entity registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Silence after which an entity is marked offline
    pub heartbeat_timeout: Duration,

    /// How long an offline entity is kept before eviction
    pub retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            retention: Duration::from_secs(15 * 60),
        }
    }
}

impl RegistryConfig {
    /// Set the heartbeat timeout
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the retention window
    ///
    /// Clamped so it is never shorter than the heartbeat timeout.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention.max(self.heartbeat_timeout);
        self
    }
}
