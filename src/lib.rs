//! SECS device - simulated SECS/GEM equipment endpoint over HSMS.
//!
//! This library runs one side of an HSMS link and correlates SECS-II
//! primary and secondary messages by transaction id.
//!
//! # Architecture
//!
//! The session follows a single-owner model:
//!
//! - **Transport (TCP)**: Frames bytes, delivers every frame to the session
//! - **Session (engine)**: Owns state, pending sends and unreplied primaries
//!
//! Key design principles:
//!
//! - Each [`Session`] owns: one link + one event loop + background timers
//! - Every reply is matched by system bytes, never by arrival order
//! - Peer primaries are surfaced as [`UnrepliedPrimary`] entries that can
//!   be answered in any order
//! - Event-driven notifications (no polling)
//!
//! # Quick Start
//!
//! ```no_run
//! use secs_device::{ConnectionState, Result, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Connect out to an equipment simulator on port 5000
//!     let session = Session::builder().active().port(5000).build()?;
//!     session.enable().await?;
//!     assert_eq!(session.state(), ConnectionState::Selected);
//!
//!     // Are you there?
//!     let reply = session.send("S1F1 W".parse()?).await?;
//!     println!("{:?}", reply);
//!
//!     session.disable();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | SECS-II items, messages, SML and HSMS frames |
//! | [`session`] | Session engine: [`Session`], [`UnrepliedPrimary`] |
//! | [`trace`] | Diagnostic sink: [`TraceSink`], [`TracingSink`] |
//! | [`transport`] | TCP framing and endpoints (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing transaction ids and device ids.
pub mod identifiers;

/// SECS-II message model and HSMS frame types.
pub mod protocol;

/// Session engine.
///
/// Use [`Session::builder()`] to create a configured session.
pub mod session;

/// Diagnostic sink for session traffic.
pub mod trace;

/// TCP transport layer.
///
/// Internal module handling framing, the link event loop and endpoints.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{DeviceId, SessionId, SystemBytes};

// Protocol types
pub use protocol::{Item, ItemFormat, SecsMessage, parse_sml, to_sml};

// Session types
pub use session::{
    ConnectionRole, ConnectionState, Session, SessionBuilder, SessionEvent, SessionOptions,
    UnrepliedPrimary,
};

// Trace types
pub use trace::{TraceSink, TracingSink};
