//! Adaptive bitrate streaming
//!
//! A streaming logical stream carries one session: a JSON handshake, then
//! length-prefixed chunks paced at the chunk duration, with client feedback
//! flowing the other way to steer the quality tier.

pub mod adaptation;
pub mod config;
pub mod controller;
pub mod protocol;
pub mod session;
pub mod source;

pub use adaptation::{Adaptation, AdaptationPolicy, Feedback};
pub use config::StreamingConfig;
pub use controller::StreamingController;
pub use protocol::{
    ChunkCodec, ChunkFrame, ChunkHeader, StreamRequest, StreamResponse, StreamStatus,
};
pub use session::{QualityChange, StreamSession};
pub use source::{ChunkSource, PatternSource};
