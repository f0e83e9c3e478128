//! Streaming controller configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::adaptation::AdaptationPolicy;
use crate::ladder::QualityLadder;

/// Streaming controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Media time covered by one chunk, also the emission period
    pub chunk_duration: Duration,

    /// Every Nth chunk is a keyframe
    pub keyframe_interval: u64,

    /// Available quality tiers
    pub ladder: QualityLadder,

    /// Adaptation thresholds
    pub policy: AdaptationPolicy,

    /// Longest accepted handshake or feedback line in bytes
    pub max_message_len: usize,

    /// Longest accepted chunk header in bytes
    pub max_header_len: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_secs(2),
            keyframe_interval: 30,
            ladder: QualityLadder::standard(),
            policy: AdaptationPolicy::default(),
            max_message_len: 16 * 1024,
            max_header_len: 16 * 1024,
        }
    }
}

impl StreamingConfig {
    /// Set chunk duration (minimum 1ms)
    pub fn chunk_duration(mut self, duration: Duration) -> Self {
        self.chunk_duration = duration.max(Duration::from_millis(1));
        self
    }

    /// Set keyframe interval (minimum 1)
    pub fn keyframe_interval(mut self, interval: u64) -> Self {
        self.keyframe_interval = interval.max(1);
        self
    }

    pub fn ladder(mut self, ladder: QualityLadder) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn policy(mut self, policy: AdaptationPolicy) -> Self {
        self.policy = policy;
        self
    }
}
