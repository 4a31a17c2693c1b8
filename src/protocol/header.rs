//! HSMS message header and frame model.
//!
//! Every HSMS message is a 10-byte header followed by an optional body.
//!
//! ```text
//! ┌────────────┬────────┬────────┬───────┬───────┬──────────────┐
//! │ session id │ byte 2 │ byte 3 │ PType │ SType │ system bytes │
//! │  2 bytes   │ W|strm │ func   │   0   │       │   4 bytes    │
//! └────────────┴────────┴────────┴───────┴───────┴──────────────┘
//! ```
//!
//! Data messages (SType 0) carry stream and function in bytes 2 and 3;
//! control messages reuse those bytes for status and reason codes.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, SystemBytes};

use super::message::SecsMessage;

// ============================================================================
// Constants
// ============================================================================

/// Length of the HSMS header in bytes.
pub const HEADER_LEN: usize = 10;

/// Session id used by control messages that are not device-specific.
const CONTROL_SESSION_ID: u16 = 0xFFFF;

/// W-bit in header byte 2.
const W_BIT: u8 = 0x80;

/// Reject reason: SType not supported.
pub const REJECT_STYPE_NOT_SUPPORTED: u8 = 1;

/// Reject reason: PType not supported.
pub const REJECT_PTYPE_NOT_SUPPORTED: u8 = 2;

/// Reject reason: data message received while not selected.
pub const REJECT_NOT_SELECTED: u8 = 4;

// ============================================================================
// MessageType
// ============================================================================

/// HSMS session type (SType).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// SECS-II data message.
    Data = 0,
    /// Select.req.
    SelectReq = 1,
    /// Select.rsp.
    SelectRsp = 2,
    /// Deselect.req.
    DeselectReq = 3,
    /// Deselect.rsp.
    DeselectRsp = 4,
    /// Linktest.req.
    LinktestReq = 5,
    /// Linktest.rsp.
    LinktestRsp = 6,
    /// Reject.req.
    RejectReq = 7,
    /// Separate.req.
    SeparateReq = 9,
}

impl MessageType {
    /// Looks up a message type by SType value.
    #[must_use]
    pub const fn from_stype(stype: u8) -> Option<Self> {
        Some(match stype {
            0 => Self::Data,
            1 => Self::SelectReq,
            2 => Self::SelectRsp,
            3 => Self::DeselectReq,
            4 => Self::DeselectRsp,
            5 => Self::LinktestReq,
            6 => Self::LinktestRsp,
            7 => Self::RejectReq,
            9 => Self::SeparateReq,
            _ => return None,
        })
    }

    /// Returns `true` for every type except [`MessageType::Data`].
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        !matches!(self, Self::Data)
    }
}

// ============================================================================
// SelectStatus
// ============================================================================

/// Status code carried by Select.rsp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SelectStatus {
    /// Communication established.
    Ok = 0,
    /// Communication already active.
    AlreadyActive = 1,
    /// Connection not ready.
    NotReady = 2,
    /// Connect exhausted.
    Exhausted = 3,
}

impl SelectStatus {
    /// Maps a raw status byte; unknown codes are treated as not ready.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::AlreadyActive,
            3 => Self::Exhausted,
            _ => Self::NotReady,
        }
    }
}

// ============================================================================
// HsmsHeader
// ============================================================================

/// Decoded 10-byte HSMS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsmsHeader {
    /// Session (device) id.
    pub session_id: u16,
    /// W-bit and stream for data, status or rejected SType for control.
    pub byte2: u8,
    /// Function for data, status or reason code for control.
    pub byte3: u8,
    /// Presentation type; 0 for SECS-II.
    pub ptype: u8,
    /// Session type.
    pub stype: u8,
    /// Transaction id.
    pub system_bytes: SystemBytes,
}

impl HsmsHeader {
    /// Builds a control header.
    #[must_use]
    pub const fn control(
        message_type: MessageType,
        byte2: u8,
        byte3: u8,
        id: SystemBytes,
    ) -> Self {
        Self {
            session_id: CONTROL_SESSION_ID,
            byte2,
            byte3,
            ptype: 0,
            stype: message_type as u8,
            system_bytes: id,
        }
    }

    /// Writes the header to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16(self.session_id);
        dst.put_u8(self.byte2);
        dst.put_u8(self.byte3);
        dst.put_u8(self.ptype);
        dst.put_u8(self.stype);
        dst.put_u32(self.system_bytes.get());
    }

    /// Reads a header from `src`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if fewer than [`HEADER_LEN`] bytes remain.
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < HEADER_LEN {
            return Err(Error::protocol(format!(
                "HSMS header needs {HEADER_LEN} bytes, have {}",
                src.remaining()
            )));
        }

        Ok(Self {
            session_id: src.get_u16(),
            byte2: src.get_u8(),
            byte3: src.get_u8(),
            ptype: src.get_u8(),
            stype: src.get_u8(),
            system_bytes: SystemBytes::new(src.get_u32()),
        })
    }

    /// Returns the decoded message type, if known.
    #[inline]
    #[must_use]
    pub const fn message_type(&self) -> Option<MessageType> {
        MessageType::from_stype(self.stype)
    }
}

// ============================================================================
// HsmsMessage
// ============================================================================

/// One HSMS frame: header plus raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsmsMessage {
    /// Message header.
    pub header: HsmsHeader,
    /// Encoded SECS-II body (empty for control messages).
    pub body: Bytes,
}

// ============================================================================
// HsmsMessage - Constructors
// ============================================================================

impl HsmsMessage {
    fn control(header: HsmsHeader) -> Self {
        Self {
            header,
            body: Bytes::new(),
        }
    }

    /// Creates a Select.req.
    #[must_use]
    pub fn select_req(id: SystemBytes) -> Self {
        Self::control(HsmsHeader::control(MessageType::SelectReq, 0, 0, id))
    }

    /// Creates a Select.rsp with the given status.
    #[must_use]
    pub fn select_rsp(id: SystemBytes, status: SelectStatus) -> Self {
        Self::control(HsmsHeader::control(
            MessageType::SelectRsp,
            0,
            status as u8,
            id,
        ))
    }

    /// Creates a Deselect.rsp accepting the request.
    #[must_use]
    pub fn deselect_rsp(id: SystemBytes) -> Self {
        Self::control(HsmsHeader::control(MessageType::DeselectRsp, 0, 0, id))
    }

    /// Creates a Linktest.req.
    #[must_use]
    pub fn linktest_req(id: SystemBytes) -> Self {
        Self::control(HsmsHeader::control(MessageType::LinktestReq, 0, 0, id))
    }

    /// Creates a Linktest.rsp.
    #[must_use]
    pub fn linktest_rsp(id: SystemBytes) -> Self {
        Self::control(HsmsHeader::control(MessageType::LinktestRsp, 0, 0, id))
    }

    /// Creates a Separate.req.
    #[must_use]
    pub fn separate_req(id: SystemBytes) -> Self {
        Self::control(HsmsHeader::control(MessageType::SeparateReq, 0, 0, id))
    }

    /// Creates a Reject.req answering `rejected` with `reason`.
    #[must_use]
    pub fn reject_req(rejected: &HsmsHeader, reason: u8) -> Self {
        let byte2 = if reason == REJECT_PTYPE_NOT_SUPPORTED {
            rejected.ptype
        } else {
            rejected.stype
        };
        Self::control(HsmsHeader::control(
            MessageType::RejectReq,
            byte2,
            reason,
            rejected.system_bytes,
        ))
    }

    /// Creates a data message from an already encoded body.
    #[must_use]
    pub fn data(device: DeviceId, id: SystemBytes, message: &SecsMessage, body: Bytes) -> Self {
        let w_bit = if message.reply_expected { W_BIT } else { 0 };
        Self {
            header: HsmsHeader {
                session_id: device.get(),
                byte2: w_bit | (message.stream & !W_BIT),
                byte3: message.function,
                ptype: 0,
                stype: MessageType::Data as u8,
                system_bytes: id,
            },
            body,
        }
    }
}

// ============================================================================
// HsmsMessage - Accessors
// ============================================================================

impl HsmsMessage {
    /// Returns the decoded message type, if known.
    #[inline]
    #[must_use]
    pub const fn message_type(&self) -> Option<MessageType> {
        self.header.message_type()
    }

    /// Returns the transaction id.
    #[inline]
    #[must_use]
    pub const fn system_bytes(&self) -> SystemBytes {
        self.header.system_bytes
    }

    /// Decodes the SECS-II message of a data frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if this is not a data frame or the body
    /// is not a valid item.
    pub fn to_secs_message(&self) -> Result<SecsMessage> {
        if self.message_type() != Some(MessageType::Data) {
            return Err(Error::protocol(format!(
                "SType {} is not a data message",
                self.header.stype
            )));
        }

        SecsMessage::decode_body(
            self.header.byte2 & !W_BIT,
            self.header.byte3,
            self.header.byte2 & W_BIT != 0,
            self.body.clone(),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::BytesMut;

    use crate::protocol::Item;

    #[test]
    fn test_header_roundtrip() {
        let header = HsmsHeader::control(MessageType::SelectRsp, 0, 1, SystemBytes::new(9));
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[..], &[0xFF, 0xFF, 0, 1, 0, 2, 0, 0, 0, 9]);
        assert_eq!(HsmsHeader::decode(&mut buf.freeze()).unwrap(), header);
    }

    #[test]
    fn test_header_too_short() {
        let mut buf = Bytes::from_static(&[0, 1, 2]);
        assert!(HsmsHeader::decode(&mut buf).is_err());
    }

    #[test]
    fn test_data_message_sets_w_bit() {
        let msg = SecsMessage::new(1, 1).with_reply_expected(true);
        let frame = HsmsMessage::data(
            DeviceId::new(3),
            SystemBytes::new(7),
            &msg,
            Bytes::new(),
        );
        assert_eq!(frame.header.session_id, 3);
        assert_eq!(frame.header.byte2, 0x81);
        assert_eq!(frame.header.byte3, 1);
        assert_eq!(frame.message_type(), Some(MessageType::Data));

        let decoded = frame.to_secs_message().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_data_message_with_body() {
        let msg = SecsMessage::new(6, 11).with_item(Item::U4(vec![1000]));
        let body = msg.encode_body().unwrap();
        let frame = HsmsMessage::data(DeviceId::default(), SystemBytes::new(1), &msg, body);
        assert_eq!(frame.to_secs_message().unwrap(), msg);
    }

    #[test]
    fn test_control_frame_is_not_data() {
        let frame = HsmsMessage::linktest_req(SystemBytes::new(1));
        assert!(frame.message_type().unwrap().is_control());
        assert!(frame.to_secs_message().is_err());
    }

    #[test]
    fn test_reject_echoes_rejected_header() {
        let rejected = HsmsHeader {
            session_id: 0,
            byte2: 0x81,
            byte3: 1,
            ptype: 0,
            stype: 0,
            system_bytes: SystemBytes::new(42),
        };
        let reject = HsmsMessage::reject_req(&rejected, REJECT_NOT_SELECTED);
        assert_eq!(reject.message_type(), Some(MessageType::RejectReq));
        assert_eq!(reject.header.byte2, 0);
        assert_eq!(reject.header.byte3, REJECT_NOT_SELECTED);
        assert_eq!(reject.system_bytes(), SystemBytes::new(42));
    }

    #[test]
    fn test_unknown_stype() {
        assert_eq!(MessageType::from_stype(8), None);
        assert_eq!(SelectStatus::from_u8(200), SelectStatus::NotReady);
    }
}
