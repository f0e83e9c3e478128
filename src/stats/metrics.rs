//! Statistics for streaming sessions

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Session-level statistics
///
/// Written only by the task that owns the session; everyone else sees
/// published copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    /// Stream id
    pub stream_id: String,
    /// Registry entity the session is attached to
    pub entity_id: String,
    /// Current quality tier name
    pub quality: String,
    /// Whether the session adapts to feedback
    pub adaptive: bool,
    /// Total payload bytes sent
    pub bytes_sent: u64,
    /// Chunks sent
    pub chunks_sent: u64,
    /// Keyframe chunks sent
    pub keyframes_sent: u64,
    /// Average bitrate since start (bits/sec)
    pub avg_bitrate: f64,
    /// Last reported buffer health (0.0 to 1.0)
    pub buffer_health: f64,
    /// Last reported packet loss (0.0 to 1.0)
    pub packet_loss: f64,
    /// Number of tier changes
    pub quality_changes: u64,
    /// Session start
    pub started_at: DateTime<Utc>,
    /// Last stats update
    pub last_update: DateTime<Utc>,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new(
        stream_id: impl Into<String>,
        entity_id: impl Into<String>,
        quality: impl Into<String>,
        adaptive: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            stream_id: stream_id.into(),
            entity_id: entity_id.into(),
            quality: quality.into(),
            adaptive,
            bytes_sent: 0,
            chunks_sent: 0,
            keyframes_sent: 0,
            avg_bitrate: 0.0,
            buffer_health: 1.0,
            packet_loss: 0.0,
            quality_changes: 0,
            started_at: now,
            last_update: now,
        }
    }

    /// Count one delivered chunk
    pub fn record_chunk(&mut self, size: usize, is_keyframe: bool) {
        self.bytes_sent += size as u64;
        self.chunks_sent += 1;
        if is_keyframe {
            self.keyframes_sent += 1;
        }
        self.last_update = Utc::now();
    }

    /// Calculate bitrate from bytes sent over `elapsed`
    pub fn calculate_bitrate(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.avg_bitrate = (self.bytes_sent * 8) as f64 / secs;
        }
    }

    /// Session age at the last update
    pub fn duration(&self) -> Duration {
        (self.last_update - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
