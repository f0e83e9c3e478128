//! Entity types
//!
//! This module defines the per-entity record stored in the registry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Temperature,
    Humidity,
    Motion,
    Pressure,
    Light,
    /// A video streaming session
    Session,
    #[default]
    #[serde(other)]
    Other,
}

impl EntityKind {
    /// Whether this entity is a physical device (as opposed to a session)
    pub fn is_device(&self) -> bool {
        !matches!(self, EntityKind::Session)
    }
}

/// A device or session known to the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity id
    pub id: String,
    /// Entity kind
    #[serde(default)]
    pub kind: EntityKind,
    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Location or other placement metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Last inbound activity
    pub last_seen: DateTime<Utc>,
    /// Liveness flag, cleared by a sweep
    pub online: bool,
    /// Number of active streams referencing this entity
    #[serde(default)]
    pub attached_streams: u32,
}

impl Entity {
    /// Create a new online entity seen now
    pub fn new(id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            location: None,
            last_seen: Utc::now(),
            online: true,
            attached_streams: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Time since last activity at `now` (zero if `last_seen` is in the future)
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_seen).to_std().unwrap_or(Duration::ZERO)
    }

    /// Record inbound activity
    pub(super) fn mark_seen(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.online = true;
    }

    /// Merge metadata from a fresh registration, keeping what it leaves unset
    pub(super) fn merge_metadata(&mut self, other: Entity) {
        if other.kind != EntityKind::Other {
            self.kind = other.kind;
        }
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.location.is_some() {
            self.location = other.location;
        }
    }
}

/// Online/offline tallies from one registry snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    /// Online devices
    pub online_devices: usize,
    /// Offline devices
    pub offline_devices: usize,
    /// Sessions currently registered
    pub sessions: usize,
}
