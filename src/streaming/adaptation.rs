//! Bitrate adaptation policy
//!
//! ```text
//!  buffer_health  0.0 ──── 0.3 ─────────────── 0.8 ──── 1.0
//!                 │ down   │      hold          │  up*  │
//!  packet_loss    0.0 ── 0.01 ────── 0.05 ──────────── 1.0
//!                 │ up*  │    hold    │      down       │
//!
//!  down: buffer < low_buffer  OR  loss > high_loss
//!  up:   buffer > high_buffer AND loss < low_loss
//! ```
//!
//! The gap between the thresholds keeps a session from oscillating when
//! feedback sits in the middle band.

use serde::{Deserialize, Serialize};

/// Adaptation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationPolicy {
    /// Step down below this buffer health
    pub low_buffer: f64,
    /// Step up above this buffer health (with low loss)
    pub high_buffer: f64,
    /// Step up only below this packet loss
    pub low_loss: f64,
    /// Step down above this packet loss
    pub high_loss: f64,
}

impl Default for AdaptationPolicy {
    fn default() -> Self {
        Self {
            low_buffer: 0.3,
            high_buffer: 0.8,
            low_loss: 0.01,
            high_loss: 0.05,
        }
    }
}

/// Decision for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adaptation {
    StepDown,
    StepUp,
    Hold,
}

impl AdaptationPolicy {
    pub fn decide(&self, feedback: Feedback) -> Adaptation {
        let Feedback {
            buffer_health,
            packet_loss,
        } = feedback.clamped();

        if buffer_health < self.low_buffer || packet_loss > self.high_loss {
            Adaptation::StepDown
        } else if buffer_health > self.high_buffer && packet_loss < self.low_loss {
            Adaptation::StepUp
        } else {
            Adaptation::Hold
        }
    }
}

/// Client-reported playback conditions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Fraction of the client buffer filled, 0.0 to 1.0
    pub buffer_health: f64,
    /// Fraction of data lost, 0.0 to 1.0
    #[serde(default)]
    pub packet_loss: f64,
}

impl Feedback {
    pub fn new(buffer_health: f64, packet_loss: f64) -> Self {
        Self {
            buffer_health,
            packet_loss,
        }
    }

    /// Clamp both fields into `[0, 1]`; NaN counts as zero
    pub fn clamped(self) -> Self {
        fn unit(v: f64) -> f64 {
            if v.is_nan() {
                0.0
            } else {
                v.clamp(0.0, 1.0)
            }
        }
        Self {
            buffer_health: unit(self.buffer_health),
            packet_loss: unit(self.packet_loss),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let policy = AdaptationPolicy::default();

        assert_eq!(policy.decide(Feedback::new(0.1, 0.0)), Adaptation::StepDown);
        assert_eq!(policy.decide(Feedback::new(0.9, 0.06)), Adaptation::StepDown);
        assert_eq!(policy.decide(Feedback::new(0.9, 0.0)), Adaptation::StepUp);
        assert_eq!(policy.decide(Feedback::new(0.9, 0.02)), Adaptation::Hold);
        assert_eq!(policy.decide(Feedback::new(0.5, 0.0)), Adaptation::Hold);
    }

    #[test]
    fn test_middle_band_holds() {
        let policy = AdaptationPolicy::default();

        for _ in 0..10 {
            assert_eq!(policy.decide(Feedback::new(0.5, 0.02)), Adaptation::Hold);
        }
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let policy = AdaptationPolicy::default();

        assert_eq!(policy.decide(Feedback::new(0.3, 0.05)), Adaptation::Hold);
        assert_eq!(policy.decide(Feedback::new(0.8, 0.0)), Adaptation::Hold);
    }

    #[test]
    fn test_out_of_range_feedback_clamped() {
        let fb = Feedback::new(f64::NAN, 7.0).clamped();

        assert_eq!(fb.buffer_health, 0.0);
        assert_eq!(fb.packet_loss, 1.0);
    }
}
