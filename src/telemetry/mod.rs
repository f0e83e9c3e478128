//! Telemetry channel
//!
//! Lightweight device messaging over a logical stream: heartbeats, sensor
//! data and commands as newline-delimited JSON envelopes, with bounded queues
//! feeding background processors.

pub mod config;
pub mod envelope;
pub mod handler;
pub mod processor;

pub use config::TelemetryConfig;
pub use envelope::{
    CommandRequest, Envelope, EnvelopeKind, HeartbeatInfo, Reliability, ResponseBody,
    ResponseStatus,
};
pub use handler::{TelemetryCounters, TelemetryHandler, TelemetryQueues, TelemetrySnapshot};
pub use processor::{spawn_data_processor, CommandOutcome, CommandProcessor, Reading, ReadingLog};
