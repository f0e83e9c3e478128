//! Quality ladder
//!
//! An ordered, immutable catalogue of delivery tiers. The ladder is validated
//! once at construction (non-empty, strictly increasing bitrate) and shared
//! cheaply afterwards; sessions refer to tiers by index.

pub mod tier;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use tier::{QualityRequest, QualityTier};

/// Ladder validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    #[error("quality ladder is empty")]
    Empty,

    #[error("quality ladder not strictly increasing in bitrate at tier {index} ({name})")]
    NotIncreasing { index: usize, name: String },
}

/// Validated, shareable quality ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<QualityTier>", into = "Vec<QualityTier>")]
pub struct QualityLadder {
    tiers: Arc<[QualityTier]>,
}

impl QualityLadder {
    /// Build a ladder, rejecting empty or non-monotonic tier lists
    pub fn new(tiers: Vec<QualityTier>) -> Result<Self, LadderError> {
        if tiers.is_empty() {
            return Err(LadderError::Empty);
        }

        for (index, pair) in tiers.windows(2).enumerate() {
            if pair[1].bitrate_kbps <= pair[0].bitrate_kbps {
                return Err(LadderError::NotIncreasing {
                    index: index + 1,
                    name: pair[1].name.clone(),
                });
            }
        }

        Ok(Self {
            tiers: tiers.into(),
        })
    }

    /// 360p / 480p / 720p / 1080p at 30 fps
    pub fn standard() -> Self {
        Self {
            tiers: vec![
                QualityTier::new("360p", 640, 360, 500, 30),
                QualityTier::new("480p", 854, 480, 1000, 30),
                QualityTier::new("720p", 1280, 720, 2000, 30),
                QualityTier::new("1080p", 1920, 1080, 4000, 30),
            ]
            .into(),
        }
    }

    pub fn tiers(&self) -> &[QualityTier] {
        &self.tiers
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QualityTier> {
        self.tiers.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t.name == name)
    }

    /// Resolve a client request to a tier index
    ///
    /// Exact name match wins, then a width/height match, then the tier whose
    /// bitrate is closest to the requested one. Returns `None` only when the
    /// ladder has no tiers.
    pub fn resolve(&self, request: &QualityRequest) -> Option<usize> {
        if let Some(index) = request.name().and_then(|name| self.index_of(name)) {
            return Some(index);
        }

        if let Some(index) = self
            .tiers
            .iter()
            .position(|tier| request.matches_dimensions(tier))
        {
            return Some(index);
        }

        let wanted = i64::from(request.bitrate_kbps());
        self.tiers
            .iter()
            .enumerate()
            .min_by_key(|(_, tier)| (i64::from(tier.bitrate_kbps) - wanted).abs())
            .map(|(index, _)| index)
    }

    /// One tier lower, saturating at the bottom of the ladder
    pub fn step_down(&self, index: usize) -> usize {
        index.saturating_sub(1).min(self.tiers.len().saturating_sub(1))
    }

    /// One tier higher, saturating at the top of the ladder
    pub fn step_up(&self, index: usize) -> usize {
        (index + 1).min(self.tiers.len().saturating_sub(1))
    }
}

impl Default for QualityLadder {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<QualityTier>> for QualityLadder {
    type Error = LadderError;

    fn try_from(tiers: Vec<QualityTier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<QualityLadder> for Vec<QualityTier> {
    fn from(ladder: QualityLadder) -> Self {
        ladder.tiers.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_ladder_strictly_increasing() {
        let ladder = QualityLadder::standard();
        assert_eq!(ladder.len(), 4);

        for pair in ladder.tiers().windows(2) {
            assert!(pair[0].bitrate_kbps < pair[1].bitrate_kbps);
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_new_rejects_empty() {
        assert_eq!(QualityLadder::new(vec![]), Err(LadderError::Empty));
    }

    #[test]
    fn test_new_rejects_non_increasing() {
        let result = QualityLadder::new(vec![
            QualityTier::new("a", 640, 360, 500, 30),
            QualityTier::new("b", 854, 480, 500, 30),
        ]);

        assert_eq!(
            result,
            Err(LadderError::NotIncreasing {
                index: 1,
                name: "b".into()
            })
        );
    }

    #[test]
    fn test_resolve_by_name() {
        let ladder = QualityLadder::standard();
        assert_eq!(ladder.resolve(&QualityRequest::named("720p")), Some(2));
    }

    #[test]
    fn test_resolve_by_dimensions() {
        let ladder = QualityLadder::standard();
        let request = QualityRequest::Described {
            name: Some("full-hd".into()),
            width: 1920,
            height: 1080,
            bitrate_kbps: 0,
        };
        assert_eq!(ladder.resolve(&request), Some(3));
    }

    #[test]
    fn test_resolve_by_closest_bitrate() {
        let ladder = QualityLadder::standard();

        assert_eq!(ladder.resolve(&QualityRequest::bitrate(1400)), Some(1));
        assert_eq!(ladder.resolve(&QualityRequest::bitrate(1600)), Some(2));
        assert_eq!(ladder.resolve(&QualityRequest::bitrate(10_000)), Some(3));
        // Unknown name with no other hints lands on the lowest tier
        assert_eq!(ladder.resolve(&QualityRequest::named("4k")), Some(0));
    }

    #[test]
    fn test_step_bounds() {
        let ladder = QualityLadder::standard();

        assert_eq!(ladder.step_down(0), 0);
        assert_eq!(ladder.step_down(2), 1);
        assert_eq!(ladder.step_up(2), 3);
        assert_eq!(ladder.step_up(3), 3);
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: QualityLadder = serde_json::from_str(
            r#"[{"name":"low","width":320,"height":240,"bitrate":300,"framerate":15},
                {"name":"high","width":640,"height":480,"bitrate":800,"framerate":30}]"#,
        )
        .unwrap();
        assert_eq!(ok.len(), 2);

        let bad = serde_json::from_str::<QualityLadder>("[]");
        assert!(bad.is_err());
    }
}
