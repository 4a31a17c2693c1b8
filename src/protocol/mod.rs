//! SECS-II message model and HSMS frame types.
//!
//! This module defines the values exchanged by a session and their
//! textual (SML) and binary (HSMS) representations.
//!
//! # Protocol Overview
//!
//! | Message Kind | Function | Purpose |
//! |--------------|----------|---------|
//! | Primary | odd | Initiates an exchange, may set the W-bit |
//! | Secondary | even | Reply, correlated by system bytes |
//! | Abort | 0 | Secondary that aborts the transaction |
//! | Control | n/a | HSMS select, linktest, separate, reject |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `header` | HSMS header and frame |
//! | `item` | SECS-II data items |
//! | `message` | [`SecsMessage`] |
//! | `sml` | SML text codec |

// ============================================================================
// Submodules
// ============================================================================

/// HSMS header and frame types.
pub mod header;

/// SECS-II data items.
pub mod item;

/// SECS-II message type.
pub mod message;

/// SML text codec.
pub mod sml;

// ============================================================================
// Re-exports
// ============================================================================

pub use header::{HEADER_LEN, HsmsHeader, HsmsMessage, MessageType, SelectStatus};
pub use item::{Item, ItemFormat};
pub use message::SecsMessage;
pub use sml::{parse_sml, to_sml};
