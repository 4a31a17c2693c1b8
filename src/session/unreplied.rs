//! Reply continuation for peer primaries.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::identifiers::SystemBytes;
use crate::protocol::SecsMessage;

use super::core::SessionInner;

// ============================================================================
// UnrepliedPrimary
// ============================================================================

/// A primary from the peer that still expects our secondary.
///
/// Handed out through [`SessionEvent::PrimaryReceived`] and
/// [`Session::unreplied`]. Answer it with [`reply`](Self::reply); the
/// first reply retires the entry, any later one fails with
/// [`Error::StaleReply`].
///
/// Cloning is cheap and all clones refer to the same entry.
///
/// [`SessionEvent::PrimaryReceived`]: super::SessionEvent::PrimaryReceived
/// [`Session::unreplied`]: super::Session::unreplied
#[derive(Clone)]
pub struct UnrepliedPrimary {
    /// Arrival order within the session.
    token: u64,
    /// Transaction id chosen by the peer.
    id: SystemBytes,
    /// The received primary.
    message: Arc<SecsMessage>,
    /// Arrival time.
    received_at: Instant,
    /// Owning session.
    session: Weak<SessionInner>,
}

impl fmt::Debug for UnrepliedPrimary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnrepliedPrimary")
            .field("id", &self.id)
            .field("message", &self.message.label())
            .finish_non_exhaustive()
    }
}

impl UnrepliedPrimary {
    pub(crate) fn new(
        token: u64,
        id: SystemBytes,
        message: Arc<SecsMessage>,
        session: Weak<SessionInner>,
    ) -> Self {
        Self {
            token,
            id,
            message,
            received_at: Instant::now(),
            session,
        }
    }

    /// Returns the peer's transaction id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> SystemBytes {
        self.id
    }

    /// Returns the received primary.
    #[inline]
    #[must_use]
    pub fn message(&self) -> &SecsMessage {
        &self.message
    }

    /// Returns when the primary arrived.
    #[inline]
    #[must_use]
    pub const fn received_at(&self) -> Instant {
        self.received_at
    }

    #[inline]
    pub(crate) const fn token(&self) -> u64 {
        self.token
    }

    /// Returns `true` if this entry was issued by `session`.
    pub(crate) fn belongs_to(&self, session: &Arc<SessionInner>) -> bool {
        Weak::as_ptr(&self.session) == Arc::as_ptr(session)
    }

    /// Sends `reply` under this primary's transaction id.
    ///
    /// # Errors
    ///
    /// - [`Error::StaleReply`] if already answered or the session was
    ///   disabled or dropped
    /// - [`Error::NotSelected`] if the link is not selected; the entry is
    ///   kept
    /// - [`Error::MalformedMessage`] if `reply` cannot be encoded
    pub fn reply(&self, reply: SecsMessage) -> Result<()> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| Error::stale_reply(self.id))?;
        session.reply_to(self, reply)
    }
}

// ============================================================================
// Tests
// ============================================================================
