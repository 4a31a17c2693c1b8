//! TCP transport layer.
//!
//! This module owns the byte-level link between the session and its peer
//! and turns it into a stream of HSMS frames.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Session        │                              │  Peer           │
//! │                 │        HSMS over TCP         │  (host or       │
//! │  FrameHandler   │◄────────────────────────────►│   equipment)    │
//! │  ← Connection   │        address:PORT          │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `endpoint::connect` (Active) or `Listener::bind` + `accept` (Passive)
//! 2. `Connection::spawn` - start the event loop with a `FrameHandler`
//! 3. `Connection::send` - queue frames
//! 4. `Connection::shutdown` - flush and close
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Length-prefixed HSMS framing |
//! | `connection` | Framed stream and event loop |
//! | `endpoint` | Active connect and passive listen |

// ============================================================================
// Submodules
// ============================================================================

/// Length-prefixed HSMS framing.
pub mod codec;

/// Framed stream and event loop.
pub mod connection;

/// Active and passive TCP endpoints.
pub mod endpoint;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{DEFAULT_MAX_FRAME_LEN, HsmsCodec};
pub use connection::{Connection, FrameHandler};
pub use endpoint::{Listener, connect};
