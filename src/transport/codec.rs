//! HSMS length-prefixed framing.
//!
//! ```text
//! ┌──────────────────┬──────────────┬──────────────┐
//! │ length (4 B, BE) │ header (10 B)│ body         │
//! └──────────────────┴──────────────┴──────────────┘
//! ```
//!
//! The length counts header plus body.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};
use crate::protocol::{HEADER_LEN, HsmsHeader, HsmsMessage};

// ============================================================================
// Constants
// ============================================================================

/// Size of the length prefix.
const LENGTH_PREFIX: usize = 4;

/// Default upper bound for one frame (header plus body).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// ============================================================================
// HsmsCodec
// ============================================================================

/// Codec turning a byte stream into [`HsmsMessage`] frames.
#[derive(Debug, Clone, Copy)]
pub struct HsmsCodec {
    max_frame_len: usize,
}

impl Default for HsmsCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl HsmsCodec {
    /// Creates a codec rejecting frames longer than `max_frame_len`.
    #[inline]
    #[must_use]
    pub const fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Returns the configured frame limit.
    #[inline]
    #[must_use]
    pub const fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

// ============================================================================
// Decoder
// ============================================================================

impl Decoder for HsmsCodec {
    type Item = HsmsMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length < HEADER_LEN {
            return Err(Error::protocol(format!(
                "frame length {length} shorter than header"
            )));
        }
        if length > self.max_frame_len {
            return Err(Error::protocol(format!(
                "frame length {length} exceeds limit {}",
                self.max_frame_len
            )));
        }

        if src.len() < LENGTH_PREFIX + length {
            src.reserve(LENGTH_PREFIX + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let mut frame = src.split_to(length);
        let header = HsmsHeader::decode(&mut frame)?;

        Ok(Some(HsmsMessage {
            header,
            body: frame.freeze(),
        }))
    }
}

// ============================================================================
// Encoder
// ============================================================================

impl Encoder<HsmsMessage> for HsmsCodec {
    type Error = Error;

    fn encode(&mut self, item: HsmsMessage, dst: &mut BytesMut) -> Result<()> {
        let length = HEADER_LEN + item.body.len();
        if length > self.max_frame_len {
            return Err(Error::protocol(format!(
                "frame length {length} exceeds limit {}",
                self.max_frame_len
            )));
        }

        dst.reserve(LENGTH_PREFIX + length);
        dst.put_u32(length as u32);
        item.header.encode(dst);
        dst.put_slice(&item.body);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
