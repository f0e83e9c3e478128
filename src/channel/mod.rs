//! Per-stream channel state and handler context

pub mod context;
pub mod state;

pub use context::ChannelContext;
pub use state::{ChannelPhase, ChannelState};
