//! Diagnostic sink for session traffic.
//!
//! Every data message crossing the link, and every notable protocol event,
//! is reported to a [`TraceSink`]. The default [`TracingSink`] forwards to
//! `tracing`; a UI can install its own sink to render a message log.
//!
//! # Format
//!
//! | Direction | Rendering |
//! |-----------|-----------|
//! | Inbound | `<-- [0x0000002A] S1F1 W` + SML body |
//! | Outbound | `--> [0x0000002A] S1F2` + SML body |

// ============================================================================
// Imports
// ============================================================================

use crate::error::Error;
use crate::identifiers::SystemBytes;
use crate::protocol::SecsMessage;

// ============================================================================
// TraceSink
// ============================================================================

/// Receiver of diagnostic events.
///
/// Implementations must not block; methods are called from the session's
/// background tasks as well as from callers of the public API. No method is
/// called while the session lock is held.
pub trait TraceSink: Send + Sync + 'static {
    /// A data message arrived from the peer.
    fn message_in(&self, message: &SecsMessage, id: SystemBytes);

    /// A data message was queued for the peer.
    fn message_out(&self, message: &SecsMessage, id: SystemBytes);

    /// Informational event.
    fn info(&self, text: &str);

    /// Recoverable anomaly (unmatched reply, duplicate id, ...).
    fn warning(&self, text: &str);

    /// Failure, with the underlying error when there is one.
    fn error(&self, text: &str, error: Option<&Error>);

    /// Verbose detail.
    fn debug(&self, text: &str);
}

// ============================================================================
// TracingSink
// ============================================================================

/// Default sink writing to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    /// Renders a message with its direction arrow and transaction id.
    #[must_use]
    pub fn render(arrow: &str, message: &SecsMessage, id: SystemBytes) -> String {
        format!("{arrow} [{id}] {}", message.to_sml())
    }
}

impl TraceSink for TracingSink {
    fn message_in(&self, message: &SecsMessage, id: SystemBytes) {
        tracing::info!(target: "secs_device::trace", "{}", Self::render("<--", message, id));
    }

    fn message_out(&self, message: &SecsMessage, id: SystemBytes) {
        tracing::info!(target: "secs_device::trace", "{}", Self::render("-->", message, id));
    }

    fn info(&self, text: &str) {
        tracing::info!(target: "secs_device::trace", "{text}");
    }

    fn warning(&self, text: &str) {
        tracing::warn!(target: "secs_device::trace", "{text}");
    }

    fn error(&self, text: &str, error: Option<&Error>) {
        match error {
            Some(e) => tracing::error!(target: "secs_device::trace", error = %e, "{text}"),
            None => tracing::error!(target: "secs_device::trace", "{text}"),
        }
    }

    fn debug(&self, text: &str) {
        tracing::debug!(target: "secs_device::trace", "{text}");
    }
}

// ============================================================================
// Tests
// ============================================================================
