//! Session configuration.
//!
//! Holds the endpoint address, role and the HSMS timers.
//!
//! # Timers
//!
//! | Timer | Field | Default | Bounds |
//! |-------|-------|---------|--------|
//! | T3 | `reply_timeout` | 45 s | one data exchange |
//! | T5 | `connect_timeout` | 10 s | outbound connect |
//! | T6 | `control_timeout` | 5 s | one control exchange |
//! | T7 | `select_timeout` | 10 s | connected but not selected |
//!
//! # JSON
//!
//! Durations are written in milliseconds; missing fields take defaults:
//!
//! ```ignore
//! use secs_device::SessionOptions;
//!
//! let options = SessionOptions::from_json(r#"{
//!     "role": "passive",
//!     "port": 5000,
//!     "reply_timeout": 3000,
//!     "linktest_interval": 20000
//! }"#)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;
use crate::protocol::HEADER_LEN;
use crate::transport::DEFAULT_MAX_FRAME_LEN;

use super::state::ConnectionRole;

// ============================================================================
// Constants
// ============================================================================

/// Default HSMS port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default T3 reply timeout.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(45);

/// Default T5 connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default T6 control transaction timeout.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default T7 not-selected timeout.
pub const DEFAULT_SELECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SessionOptions
// ============================================================================

/// Configuration of one session endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Connection role.
    pub role: ConnectionRole,

    /// Peer address (Active) or bind address (Passive).
    pub address: IpAddr,

    /// Peer port (Active) or bind port (Passive, 0 for random).
    pub port: u16,

    /// Device id written into every data header.
    pub device_id: DeviceId,

    /// T3: how long `send` waits for the secondary.
    #[serde(with = "millis")]
    pub reply_timeout: Duration,

    /// T5: bound on the outbound connect.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// T6: bound on select and linktest exchanges.
    #[serde(with = "millis")]
    pub control_timeout: Duration,

    /// T7: how long a passive session waits for Select.req.
    #[serde(with = "millis")]
    pub select_timeout: Duration,

    /// Period of the linktest heartbeat. `None` disables it.
    #[serde(with = "millis_opt")]
    pub linktest_interval: Option<Duration>,

    /// Largest frame accepted or sent.
    pub max_frame_len: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            role: ConnectionRole::Active,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            device_id: DeviceId::default(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            select_timeout: DEFAULT_SELECT_TIMEOUT,
            linktest_interval: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

// ============================================================================
// SessionOptions - Loading & Validation
// ============================================================================

impl SessionOptions {
    /// Parses and validates options from a JSON document.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document does not parse
    /// - [`Error::Config`] if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let timers = [
            ("reply_timeout", self.reply_timeout),
            ("connect_timeout", self.connect_timeout),
            ("control_timeout", self.control_timeout),
            ("select_timeout", self.select_timeout),
        ];
        for (field, value) in timers {
            if value.is_zero() {
                return Err(Error::config(format!("{field} must be non-zero")));
            }
        }

        if self.linktest_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::config(
                "linktest_interval must be non-zero; omit it to disable the heartbeat",
            ));
        }

        if self.max_frame_len < HEADER_LEN {
            return Err(Error::config(format!(
                "max_frame_len must be at least {HEADER_LEN}"
            )));
        }

        Ok(())
    }

    /// Returns T3 in whole milliseconds, as reported in timeout errors.
    #[inline]
    #[must_use]
    pub fn reply_timeout_ms(&self) -> u64 {
        u64::try_from(self.reply_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

/// `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Option<Duration>` as integer milliseconds or `null`.
mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SessionOptions::default();
        assert_eq!(options.role, ConnectionRole::Active);
        assert_eq!(options.port, 5000);
        assert_eq!(options.reply_timeout, Duration::from_secs(45));
        assert_eq!(options.control_timeout, Duration::from_secs(5));
        assert!(options.linktest_interval.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let options = SessionOptions::from_json(
            r#"{ "role": "passive", "port": 6000, "reply_timeout": 1500, "device_id": 3 }"#,
        )
        .unwrap();

        assert_eq!(options.role, ConnectionRole::Passive);
        assert_eq!(options.port, 6000);
        assert_eq!(options.reply_timeout, Duration::from_millis(1500));
        assert_eq!(options.device_id, DeviceId::new(3));
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_from_json_linktest() {
        let options = SessionOptions::from_json(r#"{ "linktest_interval": 250 }"#).unwrap();
        assert_eq!(options.linktest_interval, Some(Duration::from_millis(250)));

        let options = SessionOptions::from_json(r#"{ "linktest_interval": null }"#).unwrap();
        assert!(options.linktest_interval.is_none());
    }

    #[test]
    fn test_from_json_rejects_zero_timeout() {
        let result = SessionOptions::from_json(r#"{ "control_timeout": 0 }"#);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let result = SessionOptions::from_json("not json");
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_validate_rejects_tiny_frame_limit() {
        let options = SessionOptions {
            max_frame_len: 4,
            ..SessionOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let options = SessionOptions {
            role: ConnectionRole::Passive,
            linktest_interval: Some(Duration::from_secs(30)),
            ..SessionOptions::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"reply_timeout\":45000"));

        let back: SessionOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }
}
