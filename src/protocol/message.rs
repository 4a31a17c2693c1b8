//! SECS-II message model.
//!
//! A [`SecsMessage`] is the structured value exchanged by the session: a
//! stream/function pair, the W-bit ("reply expected"), an optional name
//! and an optional root [`Item`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

use super::item::Item;
use super::sml;

// ============================================================================
// Constants
// ============================================================================

/// Highest stream number; the top bit of the header byte is the W-bit.
pub const MAX_STREAM: u8 = 0x7F;

// ============================================================================
// SecsMessage
// ============================================================================

/// A SECS-II message.
///
/// Odd functions are primaries, even functions are secondaries (replies).
/// Function 0 is the transaction abort reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecsMessage {
    /// Stream number (0-127).
    pub stream: u8,

    /// Function number.
    pub function: u8,

    /// W-bit: the sender expects a secondary reply.
    pub reply_expected: bool,

    /// Optional human-readable name (SML only, not sent on the wire).
    pub name: Option<String>,

    /// Root data item.
    pub item: Option<Item>,
}

// ============================================================================
// Constructors
// ============================================================================

impl SecsMessage {
    /// Creates an empty message with the W-bit cleared.
    #[inline]
    #[must_use]
    pub const fn new(stream: u8, function: u8) -> Self {
        Self {
            stream,
            function,
            reply_expected: false,
            name: None,
            item: None,
        }
    }

    /// Creates an `SxF0` transaction abort message.
    #[inline]
    #[must_use]
    pub const fn abort(stream: u8) -> Self {
        Self::new(stream, 0)
    }

    /// Creates the secondary matching this primary (`SxF(y+1)`).
    #[must_use]
    pub fn reply(&self, item: Option<Item>) -> Self {
        Self {
            stream: self.stream,
            function: self.function.wrapping_add(1),
            reply_expected: false,
            name: None,
            item,
        }
    }

    /// Sets the W-bit.
    #[inline]
    #[must_use]
    pub fn with_reply_expected(mut self, reply_expected: bool) -> Self {
        self.reply_expected = reply_expected;
        self
    }

    /// Sets the message name.
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the root item.
    #[inline]
    #[must_use]
    pub fn with_item(mut self, item: Item) -> Self {
        self.item = Some(item);
        self
    }
}

// ============================================================================
// Classification
// ============================================================================

impl SecsMessage {
    /// Returns `true` for primary messages (odd function).
    #[inline]
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.function % 2 == 1
    }

    /// Returns `true` for secondary messages (even function, including F0).
    #[inline]
    #[must_use]
    pub const fn is_secondary(&self) -> bool {
        !self.is_primary()
    }

    /// Returns `true` for primaries with the W-bit set.
    #[inline]
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        self.reply_expected && self.is_primary()
    }

    /// Returns `true` for `SxF0` abort replies.
    #[inline]
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        self.function == 0
    }

    /// Returns the `SxFy` label.
    #[must_use]
    pub fn label(&self) -> String {
        format!("S{}F{}", self.stream, self.function)
    }
}

// ============================================================================
// Wire Body
// ============================================================================

impl SecsMessage {
    /// Encodes the root item into a message body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if the stream exceeds
    /// [`MAX_STREAM`] or an item is too long.
    pub fn encode_body(&self) -> Result<Bytes> {
        if self.stream > MAX_STREAM {
            return Err(Error::malformed(format!(
                "stream {} exceeds {MAX_STREAM}",
                self.stream
            )));
        }

        let mut buf = BytesMut::new();
        if let Some(item) = &self.item {
            item.encode(&mut buf)?;
        }
        Ok(buf.freeze())
    }

    /// Rebuilds a message from header fields and a wire body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the body is not exactly one item.
    pub fn decode_body(
        stream: u8,
        function: u8,
        reply_expected: bool,
        mut body: Bytes,
    ) -> Result<Self> {
        let item = if body.is_empty() {
            None
        } else {
            let item = Item::decode(&mut body)?;
            if !body.is_empty() {
                return Err(Error::protocol(format!(
                    "{} trailing bytes after root item",
                    body.len()
                )));
            }
            Some(item)
        };

        Ok(Self {
            stream,
            function,
            reply_expected,
            name: None,
            item,
        })
    }
}

// ============================================================================
// Text Conversions
// ============================================================================

impl SecsMessage {
    /// Renders the message as canonical SML.
    #[inline]
    #[must_use]
    pub fn to_sml(&self) -> String {
        sml::to_sml(self)
    }
}

impl FromStr for SecsMessage {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        sml::parse_sml(text)
    }
}

impl fmt::Display for SecsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sml())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let primary = SecsMessage::new(1, 1).with_reply_expected(true);
        assert!(primary.is_primary());
        assert!(primary.expects_reply());

        let secondary = primary.reply(None);
        assert_eq!(secondary.label(), "S1F2");
        assert!(secondary.is_secondary());
        assert!(!secondary.expects_reply());

        assert!(SecsMessage::abort(6).is_abort());
        assert!(SecsMessage::abort(6).is_secondary());
    }

    #[test]
    fn test_w_bit_on_secondary_does_not_expect_reply() {
        let msg = SecsMessage::new(1, 2).with_reply_expected(true);
        assert!(!msg.expects_reply());
    }

    #[test]
    fn test_body_roundtrip() {
        let msg = SecsMessage::new(1, 13)
            .with_reply_expected(true)
            .with_item(Item::list([Item::ascii("SIM"), Item::ascii("1.0")]));
        let body = msg.encode_body().unwrap();
        let decoded = SecsMessage::decode_body(1, 13, true, body).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_empty_body() {
        let body = SecsMessage::new(1, 1).encode_body().unwrap();
        assert!(body.is_empty());
        let decoded = SecsMessage::decode_body(1, 1, false, body).unwrap();
        assert!(decoded.item.is_none());
    }

    #[test]
    fn test_stream_out_of_range() {
        let err = SecsMessage::new(200, 1).encode_body().unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let body = Bytes::from_static(&[0x41, 0x01, b'a', 0xFF]);
        assert!(SecsMessage::decode_body(1, 1, false, body).is_err());
    }
}
