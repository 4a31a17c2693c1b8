//! Notifications published to subscribers.
//!
//! Events are queued on unbounded channels, so a slow subscriber never
//! stalls the session. Subscribers whose receiver was dropped are pruned on
//! the next publish.

// ============================================================================
// Imports
// ============================================================================

use crate::protocol::SecsMessage;

use super::state::ConnectionState;
use super::unreplied::UnrepliedPrimary;

// ============================================================================
// SessionEvent
// ============================================================================

/// Something observable happened on a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),

    /// The peer sent a primary that expects our reply.
    PrimaryReceived(UnrepliedPrimary),

    /// The peer sent a primary that expects no reply.
    Message(SecsMessage),
}

impl SessionEvent {
    /// Returns the new state for [`SessionEvent::StateChanged`].
    #[inline]
    #[must_use]
    pub const fn state(&self) -> Option<ConnectionState> {
        match self {
            Self::StateChanged(state) => Some(*state),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_accessor() {
        let event = SessionEvent::StateChanged(ConnectionState::Selected);
        assert_eq!(event.state(), Some(ConnectionState::Selected));

        let event = SessionEvent::Message(SecsMessage::new(5, 1));
        assert_eq!(event.state(), None);
    }
}
