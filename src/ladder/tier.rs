//! Quality tiers and client quality requests

use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One rung of the delivery-quality ladder
///
/// Ordered by bitrate first; the remaining fields only break ties so that
/// `Ord` stays consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualityTier {
    /// Display name (e.g., "720p")
    pub name: String,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Target bitrate in kbps
    #[serde(rename = "bitrate")]
    pub bitrate_kbps: u32,
    /// Frames per second
    pub framerate: u32,
}

impl QualityTier {
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        bitrate_kbps: u32,
        framerate: u32,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            bitrate_kbps,
            framerate,
        }
    }

    /// Bytes per second at the target bitrate
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.bitrate_kbps) * 1000 / 8
    }

    /// Payload size of one chunk covering `duration` of media
    pub fn chunk_size(&self, duration: Duration) -> usize {
        (self.bytes_per_second() as f64 * duration.as_secs_f64()) as usize
    }

    fn matches_dimensions(&self, width: u32, height: u32) -> bool {
        width != 0 && height != 0 && self.width == width && self.height == height
    }
}

impl PartialOrd for QualityTier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QualityTier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bitrate_kbps
            .cmp(&other.bitrate_kbps)
            .then_with(|| self.height.cmp(&other.height))
            .then_with(|| self.width.cmp(&other.width))
            .then_with(|| self.framerate.cmp(&other.framerate))
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Quality asked for by a streaming client
///
/// Clients may send just a tier name (`"720p"`) or a partial tier
/// description; missing fields are simply not used for matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualityRequest {
    /// Tier name only
    Named(String),
    /// Partial tier description
    Described {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        width: u32,
        #[serde(default)]
        height: u32,
        #[serde(default, rename = "bitrate")]
        bitrate_kbps: u32,
    },
}

impl QualityRequest {
    pub fn named(name: impl Into<String>) -> Self {
        QualityRequest::Named(name.into())
    }

    pub fn bitrate(bitrate_kbps: u32) -> Self {
        QualityRequest::Described {
            name: None,
            width: 0,
            height: 0,
            bitrate_kbps,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            QualityRequest::Named(name) => Some(name),
            QualityRequest::Described { name, .. } => name.as_deref(),
        }
    }

    pub(super) fn matches_dimensions(&self, tier: &QualityTier) -> bool {
        match self {
            QualityRequest::Named(_) => false,
            QualityRequest::Described { width, height, .. } => {
                tier.matches_dimensions(*width, *height)
            }
        }
    }

    pub(super) fn bitrate_kbps(&self) -> u32 {
        match self {
            QualityRequest::Named(_) => 0,
            QualityRequest::Described { bitrate_kbps, .. } => *bitrate_kbps,
        }
    }
}

impl Default for QualityRequest {
    fn default() -> Self {
        QualityRequest::bitrate(0)
    }
}
