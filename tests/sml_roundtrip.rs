//! Property tests for the SML text form and the SECS-II wire encoding.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

use secs_device::identifiers::{DeviceId, SystemBytes};
use secs_device::protocol::HsmsMessage;
use secs_device::transport::HsmsCodec;
use secs_device::{Item, SecsMessage, parse_sml};

// ============================================================================
// Strategies
// ============================================================================

fn unsigned() -> impl Strategy<Value = Item> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..6).prop_map(Item::U1),
        prop::collection::vec(any::<u16>(), 0..6).prop_map(Item::U2),
        prop::collection::vec(any::<u32>(), 0..6).prop_map(Item::U4),
        prop::collection::vec(any::<u64>(), 0..6).prop_map(Item::U8),
    ]
}

fn signed() -> impl Strategy<Value = Item> {
    prop_oneof![
        prop::collection::vec(any::<i8>(), 0..6).prop_map(Item::I1),
        prop::collection::vec(any::<i16>(), 0..6).prop_map(Item::I2),
        prop::collection::vec(any::<i32>(), 0..6).prop_map(Item::I4),
        prop::collection::vec(any::<i64>(), 0..6).prop_map(Item::I8),
    ]
}

fn leaf() -> impl Strategy<Value = Item> {
    prop_oneof![
        "[ -~]{0,16}".prop_map(Item::Ascii),
        prop::collection::vec(any::<u8>(), 0..6).prop_map(Item::Binary),
        prop::collection::vec(any::<bool>(), 0..6).prop_map(Item::Boolean),
        unsigned(),
        signed(),
    ]
}

fn item() -> impl Strategy<Value = Item> {
    leaf().prop_recursive(4, 32, 5, |inner| {
        prop::collection::vec(inner, 0..5).prop_map(Item::List)
    })
}

prop_compose! {
    fn message()(
        stream in 0u8..128,
        function in any::<u8>(),
        reply_expected in any::<bool>(),
        name in proptest::option::of("[A-Za-z][A-Za-z0-9_]{0,10}"),
        item in proptest::option::of(item()),
    ) -> SecsMessage {
        let mut message = SecsMessage::new(stream, function).with_reply_expected(reply_expected);
        message.name = name;
        message.item = item;
        message
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn sml_text_parses_back_to_the_same_message(original in message()) {
        let text = original.to_sml();
        let parsed = parse_sml(&text).unwrap();
        prop_assert_eq!(&parsed, &original);
    }

    #[test]
    fn sml_rendering_is_canonical(original in message()) {
        let once = original.to_sml();
        let twice = parse_sml(&once).unwrap().to_sml();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn item_wire_encoding_is_lossless(original in item()) {
        let mut encoded = original.to_bytes().unwrap();
        let decoded = Item::decode(&mut encoded).unwrap();
        prop_assert_eq!(decoded, original);
        prop_assert!(encoded.is_empty());
    }

    #[test]
    fn data_frames_survive_the_codec(original in message(), id in any::<u32>()) {
        let body = original.encode_body().unwrap();
        let frame = HsmsMessage::data(DeviceId::new(1), SystemBytes::new(id), &original, body);

        let mut codec = HsmsCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded.system_bytes(), SystemBytes::new(id));

        // Names never travel on the wire
        let mut expected = original.clone();
        expected.name = None;
        prop_assert_eq!(decoded.to_secs_message().unwrap(), expected);
    }
}

#[test]
fn decode_rejects_truncated_item() {
    let mut encoded = Item::ascii("HELLO").to_bytes().unwrap();
    let mut truncated: Bytes = encoded.split_to(encoded.len() - 1);
    assert!(Item::decode(&mut truncated).is_err());
}
