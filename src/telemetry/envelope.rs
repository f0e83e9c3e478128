//! Telemetry wire types
//!
//! Envelopes travel as newline-delimited JSON:
//!
//! ```text
//! {"type":"heartbeat","entity_id":"sensor-1","payload":{"kind":"temperature"}}\n
//! {"type":"data","entity_id":"sensor-1","payload":{"value":21.5,"unit":"C"}}\n
//! {"type":"command","entity_id":"sensor-1","payload":{"command":"calibrate"}}\n
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{Entity, EntityKind};

/// Envelope type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Data,
    Command,
    Heartbeat,
    Response,
}

impl EnvelopeKind {
    /// Delivery class used when the envelope does not name one
    pub fn default_reliability(self) -> Reliability {
        match self {
            EnvelopeKind::Data | EnvelopeKind::Heartbeat => Reliability::BestEffort,
            EnvelopeKind::Command | EnvelopeKind::Response => Reliability::AtLeastOnce,
        }
    }
}

/// Delivery class
///
/// Best-effort envelopes may be dropped under backpressure. At-least-once
/// envelopes are either queued or answered with an explicit rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reliability {
    BestEffort,
    AtLeastOnce,
}

/// One telemetry message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    #[serde(alias = "device_id")]
    pub entity_id: String,

    /// Sender timestamp; defaults to the receipt time when absent
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<Reliability>,

    /// Server receipt time, stamped on data envelopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, entity_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
            payload,
            reliability: None,
            received_at: None,
        }
    }

    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = Some(reliability);
        self
    }

    /// Delivery class, falling back to the kind's default
    pub fn reliability(&self) -> Reliability {
        self.reliability
            .unwrap_or_else(|| self.kind.default_reliability())
    }

    /// Build a response envelope addressed to `entity_id`
    pub fn response(
        entity_id: impl Into<String>,
        status: ResponseStatus,
        reason: Option<String>,
    ) -> Self {
        let body = ResponseBody { status, reason };
        let payload = serde_json::to_value(body).unwrap_or(Value::Null);
        Self::new(EnvelopeKind::Response, entity_id, payload)
    }

    /// Decode the payload of a response envelope
    pub fn response_body(&self) -> Option<ResponseBody> {
        if self.kind != EnvelopeKind::Response {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Status carried by a response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Heartbeat acknowledged
    Alive,
    /// At-least-once envelope queued
    Received,
    /// At-least-once envelope refused
    Rejected,
}

/// Payload of a response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub status: ResponseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Registration metadata a heartbeat payload may carry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HeartbeatInfo {
    #[serde(alias = "type")]
    pub kind: EntityKind,
    pub name: Option<String>,
    pub location: Option<String>,
}

impl HeartbeatInfo {
    /// Read metadata from a heartbeat payload; anything unparseable is ignored
    pub fn from_payload(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_default()
    }

    pub fn into_entity(self, id: impl Into<String>) -> Entity {
        let mut entity = Entity::new(id, self.kind);
        entity.name = self.name;
        entity.location = self.location;
        entity
    }
}

/// Command carried in a command envelope payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRequest {
    pub command: String,

    #[serde(default)]
    pub params: Value,
}
