//! Builder pattern for session configuration.
//!
//! Provides a fluent API for configuring and creating [`Session`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use secs_device::Session;
//!
//! # fn example() -> secs_device::Result<()> {
//! let session = Session::builder()
//!     .passive()
//!     .port(5000)
//!     .reply_timeout(Duration::from_secs(10))
//!     .linktest_interval(Duration::from_secs(30))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::identifiers::DeviceId;
use crate::trace::{TraceSink, TracingSink};

use super::core::Session;
use super::options::SessionOptions;
use super::state::ConnectionRole;

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for configuring a [`Session`] instance.
///
/// Use [`Session::builder()`] to create a new builder.
#[derive(Clone, Default)]
pub struct SessionBuilder {
    /// Accumulated options.
    options: SessionOptions,
    /// Custom trace sink; `tracing` when unset.
    trace: Option<Arc<dyn TraceSink>>,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("options", &self.options)
            .field("custom_trace", &self.trace.is_some())
            .finish()
    }
}

// ============================================================================
// SessionBuilder Implementation
// ============================================================================

impl SessionBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing options, e.g. loaded from JSON.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the connection role.
    #[inline]
    #[must_use]
    pub fn role(mut self, role: ConnectionRole) -> Self {
        self.options.role = role;
        self
    }

    /// Shorthand for `role(ConnectionRole::Active)`.
    #[inline]
    #[must_use]
    pub fn active(self) -> Self {
        self.role(ConnectionRole::Active)
    }

    /// Shorthand for `role(ConnectionRole::Passive)`.
    #[inline]
    #[must_use]
    pub fn passive(self) -> Self {
        self.role(ConnectionRole::Passive)
    }

    /// Sets the peer address (Active) or bind address (Passive).
    #[inline]
    #[must_use]
    pub fn address(mut self, address: IpAddr) -> Self {
        self.options.address = address;
        self
    }

    /// Sets the peer port (Active) or bind port (Passive).
    ///
    /// # Arguments
    ///
    /// * `port` - TCP port (0 binds a random port in Passive role)
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Sets the device id written into data headers.
    #[inline]
    #[must_use]
    pub fn device_id(mut self, device_id: u16) -> Self {
        self.options.device_id = DeviceId::new(device_id);
        self
    }

    /// Sets T3, the reply timeout.
    #[inline]
    #[must_use]
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.options.reply_timeout = timeout;
        self
    }

    /// Sets T5, the connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Sets T6, the control transaction timeout.
    #[inline]
    #[must_use]
    pub fn control_timeout(mut self, timeout: Duration) -> Self {
        self.options.control_timeout = timeout;
        self
    }

    /// Sets T7, the not-selected timeout.
    #[inline]
    #[must_use]
    pub fn select_timeout(mut self, timeout: Duration) -> Self {
        self.options.select_timeout = timeout;
        self
    }

    /// Enables the linktest heartbeat with the given period.
    #[inline]
    #[must_use]
    pub fn linktest_interval(mut self, period: Duration) -> Self {
        self.options.linktest_interval = Some(period);
        self
    }

    /// Sets the largest frame accepted or sent.
    #[inline]
    #[must_use]
    pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.options.max_frame_len = max_frame_len;
        self
    }

    /// Reports traffic to `sink` instead of `tracing`.
    #[inline]
    #[must_use]
    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    /// Builds the session with validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if an option is out
    /// of range.
    pub fn build(self) -> Result<Session> {
        let trace = self.trace.unwrap_or_else(|| Arc::new(TracingSink));
        Session::with_trace_sink(self.options, trace)
    }
}

// ============================================================================
// Tests
// ============================================================================
