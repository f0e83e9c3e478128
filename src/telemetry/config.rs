//! Telemetry channel configuration

use serde::{Deserialize, Serialize};

/// Telemetry handler and processor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Capacity of the bounded data queue
    pub data_queue_capacity: usize,

    /// Capacity of the bounded command queue
    pub command_queue_capacity: usize,

    /// Longest accepted envelope line in bytes
    pub max_envelope_len: usize,

    /// Readings kept by the data processor
    pub reading_retention: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            data_queue_capacity: 1000,
            command_queue_capacity: 100,
            max_envelope_len: 64 * 1024, // 64KB
            reading_retention: 10_000,
        }
    }
}

impl TelemetryConfig {
    /// Set data queue capacity (minimum 1)
    pub fn data_queue_capacity(mut self, capacity: usize) -> Self {
        self.data_queue_capacity = capacity.max(1);
        self
    }

    /// Set command queue capacity (minimum 1)
    pub fn command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity.max(1);
        self
    }

    pub fn max_envelope_len(mut self, len: usize) -> Self {
        self.max_envelope_len = len;
        self
    }

    pub fn reading_retention(mut self, count: usize) -> Self {
        self.reading_retention = count;
        self
    }
}
