//! Error types for the SECS device endpoint.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use secs_device::{Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     let reply = session.send("S1F1 W".parse()?).await?;
//!     println!("{:?}", reply);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Handshake`] |
//! | Caller | [`Error::InvalidState`], [`Error::NotSelected`], [`Error::DuplicateTransaction`], [`Error::StaleReply`], [`Error::MalformedMessage`] |
//! | Exchange | [`Error::Timeout`], [`Error::WaitTimeout`], [`Error::SessionClosed`], [`Error::Aborted`] |
//! | Wire | [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::SystemBytes;
use crate::session::ConnectionState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when session options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport bind or connect failed.
    ///
    /// Fatal to the current `enable()` attempt; the session stays
    /// `Disconnected`.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The transport is no longer running.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The select handshake was rejected or timed out.
    #[error("Select handshake failed: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// Operation is not legal in the current connection state.
    #[error("Operation '{operation}' not allowed while {state:?}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// State the session was in.
        state: ConnectionState,
    },

    /// A message was sent while the session was not selected.
    #[error("Session is not selected (state: {state:?})")]
    NotSelected {
        /// State the session was in.
        state: ConnectionState,
    },

    /// The caller reused a transaction id that is still awaiting a reply.
    #[error("Transaction {id} is already in flight")]
    DuplicateTransaction {
        /// The reused transaction id.
        id: SystemBytes,
    },

    /// The reply targets a primary message that is no longer tracked.
    #[error("Primary message {id} is no longer awaiting a reply")]
    StaleReply {
        /// Transaction id of the original primary.
        id: SystemBytes,
    },

    /// SML text could not be parsed.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// What the parser rejected.
        reason: String,
    },

    // ========================================================================
    // Exchange Errors
    // ========================================================================
    /// No reply arrived within the reply timeout.
    #[error("Transaction {id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Transaction id that timed out.
        id: SystemBytes,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The session did not reach the awaited state in time.
    #[error("State {state:?} not reached within {timeout_ms}ms")]
    WaitTimeout {
        /// The awaited state.
        state: ConnectionState,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The session was disabled while the operation was outstanding.
    #[error("Session closed")]
    SessionClosed,

    /// The peer aborted the transaction with an `SxF0` reply.
    #[error("Transaction {id} aborted by peer (S{stream}F0)")]
    Aborted {
        /// Transaction id that was aborted.
        id: SystemBytes,
        /// Stream of the abort message.
        stream: u8,
    },

    // ========================================================================
    // Wire Errors
    // ========================================================================
    /// Frame or item bytes violate the wire format.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(operation: &'static str, state: ConnectionState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Creates a not selected error.
    #[inline]
    pub fn not_selected(state: ConnectionState) -> Self {
        Self::NotSelected { state }
    }

    /// Creates a duplicate transaction error.
    #[inline]
    pub fn duplicate_transaction(id: SystemBytes) -> Self {
        Self::DuplicateTransaction { id }
    }

    /// Creates a stale reply error.
    #[inline]
    pub fn stale_reply(id: SystemBytes) -> Self {
        Self::StaleReply { id }
    }

    /// Creates a malformed message error.
    #[inline]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a reply timeout error.
    #[inline]
    pub fn timeout(id: SystemBytes, timeout_ms: u64) -> Self {
        Self::Timeout { id, timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::WaitTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::Handshake { .. }
                | Self::SessionClosed
                | Self::Io(_)
        )
    }

    /// Returns `true` if the caller misused the API.
    ///
    /// Caller errors have no side effect on the session.
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. }
                | Self::NotSelected { .. }
                | Self::DuplicateTransaction { .. }
                | Self::StaleReply { .. }
                | Self::MalformedMessage { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
