//! Session engine: link lifecycle and message correlation.
//!
//! # Lifecycle
//!
//! 1. Build a [`Session`] with [`Session::builder()`] or [`SessionOptions`]
//! 2. [`Session::enable`] - connect or listen, then select
//! 3. [`Session::send`] / [`UnrepliedPrimary::reply`] - exchange messages
//! 4. [`Session::disable`] - separate and discard outstanding work
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`SessionBuilder`] |
//! | `core` | [`Session`] engine |
//! | `event` | [`SessionEvent`] notifications |
//! | `options` | [`SessionOptions`] and timer defaults |
//! | `registry` | Pending and unreplied bookkeeping |
//! | `state` | [`ConnectionRole`], [`ConnectionState`] |
//! | `unreplied` | [`UnrepliedPrimary`] reply continuation |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent session configuration.
pub mod builder;

/// Session engine.
pub mod core;

/// Subscriber notifications.
pub mod event;

/// Session options and timer defaults.
pub mod options;

/// Pending and unreplied bookkeeping.
mod registry;

/// Connection role and lifecycle state.
pub mod state;

/// Reply continuation for peer primaries.
pub mod unreplied;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::SessionBuilder;
pub use core::Session;
pub use event::SessionEvent;
pub use options::SessionOptions;
pub use state::{ConnectionRole, ConnectionState};
pub use unreplied::UnrepliedPrimary;
