//! Streaming session state
//!
//! Owned by exactly one controller task. Produces chunks in sequence,
//! accumulates delivery stats and applies at most one tier change per tick.
//! Adaptive sessions re-evaluate the latest client feedback on every tick.

use std::time::{Duration, Instant};

use chrono::Utc;

use super::adaptation::{Adaptation, AdaptationPolicy, Feedback};
use super::config::StreamingConfig;
use super::protocol::{ChunkFrame, ChunkHeader, StreamRequest};
use super::source::ChunkSource;
use crate::ladder::{QualityLadder, QualityTier};
use crate::stats::SessionStats;

/// Tier change applied by [`StreamSession::adapt`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityChange {
    pub from: usize,
    pub to: usize,
}

/// One active streaming session
#[derive(Debug)]
pub struct StreamSession {
    id: String,
    entity_id: String,
    ladder: QualityLadder,
    quality: usize,
    adaptive: bool,
    chunk_duration: Duration,
    keyframe_interval: u64,
    sequence: u64,
    started: Instant,
    feedback: Option<Feedback>,
    stats: SessionStats,
}

impl StreamSession {
    /// Create a session at ladder index `quality`
    pub fn new(request: &StreamRequest, quality: usize, config: &StreamingConfig) -> Self {
        let tier_name = config
            .ladder
            .get(quality)
            .map(|t| t.name.clone())
            .unwrap_or_default();

        Self {
            id: request.stream_id.clone(),
            entity_id: request.entity().to_string(),
            ladder: config.ladder.clone(),
            quality,
            adaptive: request.adaptive,
            chunk_duration: config.chunk_duration,
            keyframe_interval: config.keyframe_interval.max(1),
            sequence: 0,
            started: Instant::now(),
            feedback: None,
            stats: SessionStats::new(
                &request.stream_id,
                request.entity(),
                tier_name,
                request.adaptive,
            ),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn quality_index(&self) -> usize {
        self.quality
    }

    pub fn current_tier(&self) -> Option<&QualityTier> {
        self.ladder.get(self.quality)
    }

    /// Sequence number the next chunk will carry
    pub fn next_sequence(&self) -> u64 {
        self.sequence
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Produce the next chunk at the current tier
    pub fn next_chunk(&mut self, source: &dyn ChunkSource) -> Option<ChunkFrame> {
        let tier = self.ladder.get(self.quality)?.clone();
        let sequence = self.sequence;
        let size = tier.chunk_size(self.chunk_duration);
        let payload = source.payload(&self.id, sequence, &tier, size);

        self.sequence += 1;

        Some(ChunkFrame {
            header: ChunkHeader {
                stream_id: self.id.clone(),
                sequence,
                timestamp: Utc::now(),
                size: payload.len(),
                quality: tier,
                is_keyframe: sequence % self.keyframe_interval == 0,
                duration_ms: self.chunk_duration.as_millis() as u64,
            },
            payload,
        })
    }

    /// Account for a chunk that was written to the stream
    pub fn record_delivery(&mut self, size: usize, is_keyframe: bool) {
        self.stats.record_chunk(size, is_keyframe);
        self.stats.calculate_bitrate(self.started.elapsed());
    }

    /// Record the latest client feedback; it stays in effect until replaced
    pub fn observe(&mut self, feedback: Feedback) {
        let feedback = feedback.clamped();
        self.stats.buffer_health = feedback.buffer_health;
        self.stats.packet_loss = feedback.packet_loss;
        self.feedback = Some(feedback);
    }

    /// Apply at most one tier step against the latest feedback
    ///
    /// Called once per tick. Holds until the client has reported at least
    /// once, and never changes quality for non-adaptive sessions.
    pub fn adapt(&mut self, policy: &AdaptationPolicy) -> Option<QualityChange> {
        if !self.adaptive {
            return None;
        }
        let feedback = self.feedback?;

        let target = match policy.decide(feedback) {
            Adaptation::StepDown => self.ladder.step_down(self.quality),
            Adaptation::StepUp => self.ladder.step_up(self.quality),
            Adaptation::Hold => self.quality,
        };
        if target == self.quality {
            return None;
        }

        let change = QualityChange {
            from: self.quality,
            to: target,
        };
        self.quality = target;
        self.stats.quality_changes += 1;
        if let Some(tier) = self.ladder.get(target) {
            self.stats.quality = tier.name.clone();
        }
        Some(change)
    }
}
