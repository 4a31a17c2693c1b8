//! Correlation registries.
//!
//! | Registry | Keyed by | Holds |
//! |----------|----------|-------|
//! | [`PendingExchanges`] | our system bytes | waiters for a secondary |
//! | [`UnrepliedQueue`] | arrival token | peer primaries we must answer |
//!
//! Both live inside the session lock; nothing here is synchronized on its
//! own.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::identifiers::SystemBytes;
use crate::protocol::SecsMessage;

use super::core::SessionInner;
use super::unreplied::UnrepliedPrimary;

// ============================================================================
// Types
// ============================================================================

/// Outcome delivered to a waiting `send`.
pub(crate) type ExchangeResult = Result<SecsMessage>;

/// Bookkeeping for one locally sent primary awaiting its secondary.
#[derive(Debug)]
pub(crate) struct PendingExchange {
    /// Completes the waiting `send`.
    tx: oneshot::Sender<ExchangeResult>,
    /// Stream of the primary, for abort reporting.
    stream: u8,
    /// When the primary was registered.
    sent_at: Instant,
}

// ============================================================================
// PendingExchanges
// ============================================================================

/// Outstanding exchanges by transaction id.
#[derive(Debug, Default)]
pub(crate) struct PendingExchanges {
    entries: FxHashMap<SystemBytes, PendingExchange>,
}

impl PendingExchanges {
    /// Registers a waiter for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTransaction`] if `id` is already live.
    pub fn register(
        &mut self,
        id: SystemBytes,
        stream: u8,
    ) -> Result<oneshot::Receiver<ExchangeResult>> {
        if self.entries.contains_key(&id) {
            return Err(Error::duplicate_transaction(id));
        }

        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingExchange {
                tx,
                stream,
                sent_at: Instant::now(),
            },
        );
        Ok(rx)
    }

    /// Completes the exchange `id` with a secondary.
    ///
    /// An `SxF0` completes it with [`Error::Aborted`]. Returns the message
    /// back if nothing is waiting for `id`.
    pub fn resolve(&mut self, id: SystemBytes, reply: SecsMessage) -> Option<SecsMessage> {
        let Some(entry) = self.entries.remove(&id) else {
            return Some(reply);
        };

        let elapsed_ms = u64::try_from(entry.sent_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::trace!(%id, elapsed_ms, "Exchange resolved");

        let outcome = if reply.is_abort() {
            Err(Error::Aborted {
                id,
                stream: entry.stream,
            })
        } else {
            Ok(reply)
        };
        let _ = entry.tx.send(outcome);
        None
    }

    /// Fails the exchange `id`. Returns `false` if it was not live.
    pub fn fail(&mut self, id: SystemBytes, error: Error) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                let _ = entry.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drops the exchange `id` without completing it.
    pub fn remove(&mut self, id: SystemBytes) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Fails every exchange with [`Error::SessionClosed`].
    pub fn fail_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.tx.send(Err(Error::SessionClosed));
        }
    }

    /// Returns `true` if `id` is awaiting a reply.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: SystemBytes) -> bool {
        self.entries.contains_key(&id)
    }

    /// Returns the number of outstanding exchanges.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// UnrepliedQueue
// ============================================================================

/// Peer primaries awaiting our reply, oldest first.
#[derive(Debug, Default)]
pub(crate) struct UnrepliedQueue {
    entries: BTreeMap<u64, UnrepliedPrimary>,
    next_token: u64,
}

impl UnrepliedQueue {
    /// Appends a primary received with transaction id `id`.
    ///
    /// Returns `None` when an entry for `id` is still live; the peer
    /// reused a transaction id and the newer primary is ignored.
    pub fn insert(
        &mut self,
        id: SystemBytes,
        message: SecsMessage,
        session: Weak<SessionInner>,
    ) -> Option<UnrepliedPrimary> {
        if self.contains_id(id) {
            return None;
        }

        self.next_token += 1;
        let entry = UnrepliedPrimary::new(self.next_token, id, Arc::new(message), session);
        self.entries.insert(entry.token(), entry.clone());
        Some(entry)
    }

    /// Removes and returns the entry with `token`.
    pub fn take(&mut self, token: u64) -> Option<UnrepliedPrimary> {
        self.entries.remove(&token)
    }

    /// Returns `true` if the entry with `token` is live.
    #[inline]
    #[must_use]
    pub fn contains(&self, token: u64) -> bool {
        self.entries.contains_key(&token)
    }

    /// Returns `true` if an entry for peer id `id` is live.
    #[must_use]
    pub fn contains_id(&self, id: SystemBytes) -> bool {
        self.entries.values().any(|entry| entry.id() == id)
    }

    /// Returns the live entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UnrepliedPrimary> {
        self.entries.values().cloned().collect()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the number of live entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entry is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
