//! Connection role and lifecycle state.
//!
//! ```text
//!              enable()                     select ok
//! Disconnected ───────► Connecting ──► Connected ──────► Selected
//!      ▲                                   ▲                │
//!      │                                   └── Deselect.req ┘
//!      └──────────── disable() / link lost / Separate.req ──────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// ConnectionRole
// ============================================================================

/// Which side opens the TCP connection. Fixed at session creation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Connects out and initiates the select handshake.
    #[default]
    Active,
    /// Listens for the peer and answers its select request.
    Passive,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Passive => f.write_str("passive"),
        }
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport. The only state `enable()` accepts.
    #[default]
    Disconnected,
    /// Connecting out (Active) or listening for the peer (Passive).
    Connecting,
    /// TCP link up, select not yet complete.
    Connected,
    /// Select complete; data messages may flow.
    Selected,
}

impl ConnectionState {
    /// Returns `true` while a transport or listener is held.
    #[inline]
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Returns `true` if data messages may be exchanged.
    #[inline]
    #[must_use]
    pub const fn is_selected(self) -> bool {
        matches!(self, Self::Selected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Selected => "selected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Tests
// ============================================================================
