//! quicmux: protocol session and adaptive streaming engine
//!
//! Multiplexes application protocols over a transport whose connections carry
//! many independent logical streams (QUIC, or the in-memory transport used in
//! tests). Every logical stream opens with a 4-byte protocol identifier:
//!
//! ```text
//!  connection ──┬── stream "IOTM" ──► telemetry: heartbeats, data, commands
//!               ├── stream "STRM" ──► adaptive streaming session
//!               └── stream "????" ──► closed, connection keeps going
//! ```
//!
//! # Example
//!
//! ```no_run
//! use quicmux::{memory_transport, Engine, EngineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> quicmux::Result<()> {
//! let engine = Engine::new(EngineConfig::default());
//! let (_connector, transport) = memory_transport(16);
//!
//! engine.run(transport, CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod ladder;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;
pub mod streaming;
pub mod telemetry;
pub mod transport;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use ladder::{QualityLadder, QualityRequest, QualityTier};
pub use protocol::ProtocolId;
pub use registry::{Entity, EntityKind, EntityRegistry, RegistryConfig};
pub use server::{ProtocolDispatcher, Server, ServerConfig, StreamHandler};
pub use stats::{SessionStats, StatsAggregator, StatsReport};
pub use streaming::{AdaptationPolicy, StreamingConfig, StreamingController};
pub use telemetry::{Envelope, TelemetryConfig, TelemetryHandler};
pub use transport::{memory_transport, BoxedStream, Connection, Transport};
