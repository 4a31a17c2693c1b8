//! Codec benchmark suite.
//!
//! Measures the hot paths of every exchange:
//! - SECS-II item encode and decode
//! - SML render and parse
//! - HSMS frame encode and decode
//! - A full send/reply round trip over loopback
//!
//! Run with: cargo bench --bench codec
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::time::Duration;

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use tokio_util::codec::{Decoder, Encoder};

use secs_device::identifiers::{DeviceId, SystemBytes};
use secs_device::protocol::HsmsMessage;
use secs_device::transport::HsmsCodec;
use secs_device::{Item, SecsMessage, Session, SessionEvent, parse_sml};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const LIST_WIDTHS: &[usize] = &[1, 16, 256];

// ============================================================================
// Fixtures
// ============================================================================

/// An S6F11-shaped event report with `width` variables.
fn event_report(width: usize) -> SecsMessage {
    let variables = (0..width).map(|i| {
        Item::list([
            Item::U4(vec![i as u32]),
            Item::ascii(format!("VALUE-{i}")),
        ])
    });

    SecsMessage::new(6, 11)
        .with_reply_expected(true)
        .with_item(Item::list([
            Item::U4(vec![1]),
            Item::U4(vec![4000]),
            Item::list(variables),
        ]))
}

// ============================================================================
// Benchmark: Items
// ============================================================================

fn bench_item(c: &mut Criterion) {
    let mut group = c.benchmark_group("item");

    for &width in LIST_WIDTHS {
        let message = event_report(width);
        let item = message.item.clone().unwrap_or_else(|| Item::list([]));
        let encoded = item.to_bytes().unwrap();

        group.bench_with_input(BenchmarkId::new("encode", width), &item, |b, item| {
            b.iter(|| black_box(item.to_bytes().unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("decode", width), &encoded, |b, encoded| {
            b.iter(|| {
                let mut src = encoded.clone();
                black_box(Item::decode(&mut src).unwrap())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: SML
// ============================================================================

fn bench_sml(c: &mut Criterion) {
    let mut group = c.benchmark_group("sml");

    for &width in LIST_WIDTHS {
        let message = event_report(width);
        let text = message.to_sml();

        group.bench_with_input(BenchmarkId::new("render", width), &message, |b, message| {
            b.iter(|| black_box(message.to_sml()));
        });

        group.bench_with_input(BenchmarkId::new("parse", width), &text, |b, text| {
            b.iter(|| black_box(parse_sml(text).unwrap()));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: HSMS Frames
// ============================================================================

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    for &width in LIST_WIDTHS {
        let message = event_report(width);
        let body = message.encode_body().unwrap();
        let frame = HsmsMessage::data(DeviceId::new(1), SystemBytes::new(7), &message, body);

        let mut wire = BytesMut::new();
        HsmsCodec::default().encode(frame.clone(), &mut wire).unwrap();

        group.bench_with_input(BenchmarkId::new("encode", width), &frame, |b, frame| {
            let mut codec = HsmsCodec::default();
            b.iter(|| {
                let mut dst = BytesMut::new();
                codec.encode(frame.clone(), &mut dst).unwrap();
                black_box(dst)
            });
        });

        group.bench_with_input(BenchmarkId::new("decode", width), &wire, |b, wire| {
            let mut codec = HsmsCodec::default();
            b.iter(|| {
                let mut src = wire.clone();
                black_box(codec.decode(&mut src).unwrap())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Loopback Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    // A passive responder answering every primary with an empty reply
    let (initiator, _responder) = rt.block_on(async {
        let responder = Session::builder().passive().port(0).build().unwrap();
        responder.enable().await.unwrap();
        let port = responder.local_addr().unwrap().port();

        let mut events = responder.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let SessionEvent::PrimaryReceived(primary) = event {
                    let reply = primary.message().reply(None);
                    let _ = primary.reply(reply);
                }
            }
        });

        let initiator = Session::builder().active().port(port).build().unwrap();
        initiator.enable().await.unwrap();
        (initiator, responder)
    });

    let mut group = c.benchmark_group("round_trip");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("s1f1", |b| {
        b.to_async(&rt).iter(|| async {
            let primary = SecsMessage::new(1, 1).with_reply_expected(true);
            black_box(initiator.send(primary).await.unwrap())
        });
    });

    group.finish();
    initiator.disable();
}

criterion_group!(benches, bench_item, bench_sml, bench_frame, bench_round_trip);
criterion_main!(benches);
