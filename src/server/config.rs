//! Server configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::server::dispatcher::DEFAULT_IDENTIFIER_TIMEOUT;

/// Server configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Time a new logical stream has to send its protocol identifier
    pub identifier_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 0, // Unlimited
            identifier_timeout: DEFAULT_IDENTIFIER_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the identifier read timeout
    pub fn identifier_timeout(mut self, timeout: Duration) -> Self {
        self.identifier_timeout = timeout;
        self
    }
}
