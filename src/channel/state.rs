//! Logical channel state machine
//!
//! Tracks one logical stream from the moment it is accepted until it closes.
//!
//! ```text
//! AwaitingIdentifier ──► Dispatched(id) ──► Looping ──► Closed
//!          │                   │                          ▲
//!          └───────────────────┴──────────────────────────┘
//! ```

use std::time::{Duration, Instant};

use crate::protocol::ProtocolId;

/// Channel lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// Stream accepted, identifier not read yet
    AwaitingIdentifier,
    /// Identifier read and a handler selected
    Dispatched(ProtocolId),
    /// Handler is running its message loop
    Looping,
    /// Stream closed
    Closed,
}

/// Complete channel state
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Current phase
    phase: ChannelPhase,

    /// Protocol selected at dispatch
    protocol: Option<ProtocolId>,

    /// When the stream was accepted
    opened_at: Instant,

    /// Messages processed while looping
    messages: u64,
}

impl ChannelState {
    /// Create a new channel state
    pub fn new() -> Self {
        Self {
            phase: ChannelPhase::AwaitingIdentifier,
            protocol: None,
            opened_at: Instant::now(),
            messages: 0,
        }
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    pub fn protocol(&self) -> Option<ProtocolId> {
        self.protocol
    }

    /// Record the handler selection
    pub fn dispatch(&mut self, protocol: ProtocolId) {
        if self.phase == ChannelPhase::AwaitingIdentifier {
            self.phase = ChannelPhase::Dispatched(protocol);
            self.protocol = Some(protocol);
        }
    }

    /// Handler entered its message loop
    pub fn start_loop(&mut self) {
        if matches!(self.phase, ChannelPhase::Dispatched(_)) {
            self.phase = ChannelPhase::Looping;
        }
    }

    /// Count one processed message
    pub fn on_message(&mut self) {
        self.messages += 1;
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Close the channel; closing twice is a no-op
    pub fn close(&mut self) {
        self.phase = ChannelPhase::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ChannelPhase::Closed
    }

    /// Time since the stream was accepted
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_lifecycle() {
        let mut state = ChannelState::new();
        assert_eq!(state.phase(), ChannelPhase::AwaitingIdentifier);

        state.dispatch(ProtocolId::TELEMETRY);
        assert_eq!(
            state.phase(),
            ChannelPhase::Dispatched(ProtocolId::TELEMETRY)
        );

        state.start_loop();
        assert_eq!(state.phase(), ChannelPhase::Looping);

        state.on_message();
        state.on_message();
        assert_eq!(state.messages(), 2);

        state.close();
        state.close();
        assert!(state.is_closed());
        assert_eq!(state.protocol(), Some(ProtocolId::TELEMETRY));
    }

    #[test]
    fn test_loop_requires_dispatch() {
        let mut state = ChannelState::new();

        state.start_loop();
        assert_eq!(state.phase(), ChannelPhase::AwaitingIdentifier);

        state.close();
        state.dispatch(ProtocolId::STREAMING);
        assert!(state.is_closed());
        assert_eq!(state.protocol(), None);
    }
}
