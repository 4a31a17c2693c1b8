//! Shared utilities for integration tests.
//!
//! Provides a scripted HSMS peer on a real loopback socket plus session
//! fixtures in both roles.

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use secs_device::protocol::{HsmsHeader, HsmsMessage, MessageType, SelectStatus};
use secs_device::transport::HsmsCodec;
use secs_device::{
    ConnectionState, DeviceId, Error, SecsMessage, Session, SessionBuilder, SystemBytes,
    TraceSink,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(3);

// ============================================================================
// Logging
// ============================================================================

/// Initialize tracing once per test binary; `RUST_LOG` controls the filter.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Peer
// ============================================================================

/// The far end of a session, driven frame by frame.
pub struct Peer {
    framed: Framed<TcpStream, HsmsCodec>,
}

impl Peer {
    /// Connects to a passive session.
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("peer connect");
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, HsmsCodec::default()),
        }
    }

    pub async fn send(&mut self, frame: HsmsMessage) {
        self.framed.send(frame).await.expect("peer send");
    }

    /// Sends a data message from the peer under `id`.
    pub async fn send_data(&mut self, id: u32, message: &SecsMessage) {
        let body = message.encode_body().expect("encode");
        self.send(HsmsMessage::data(
            DeviceId::new(0),
            SystemBytes::new(id),
            message,
            body,
        ))
        .await;
    }

    /// Receives the next frame or panics after [`WAIT`].
    pub async fn recv(&mut self) -> HsmsMessage {
        timeout(WAIT, self.framed.next())
            .await
            .expect("peer timed out waiting for a frame")
            .expect("link closed")
            .expect("frame decode")
    }

    /// Receives the next frame and decodes it as a data message.
    pub async fn recv_data(&mut self) -> (SystemBytes, SecsMessage) {
        let frame = self.recv().await;
        let message = frame.to_secs_message().expect("data frame");
        (frame.system_bytes(), message)
    }

    /// Returns `None` if nothing arrives within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<HsmsMessage> {
        match timeout(wait, self.framed.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            _ => None,
        }
    }

    /// Receives the next frame, answering any Linktest.req on the way.
    pub async fn recv_answering_linktest(&mut self) -> HsmsMessage {
        loop {
            let frame = self.recv().await;
            if frame.message_type() != Some(MessageType::LinktestReq) {
                return frame;
            }
            self.send(HsmsMessage::linktest_rsp(frame.system_bytes()))
                .await;
        }
    }

    /// Runs the select handshake as initiator.
    pub async fn select(&mut self) {
        self.send(HsmsMessage::select_req(SystemBytes::new(0xFFFF_0001)))
            .await;
        let response = self.recv_answering_linktest().await;
        assert_eq!(response.message_type(), Some(MessageType::SelectRsp));
        assert_eq!(response.header.byte3, SelectStatus::Ok as u8);
    }

    /// Sends Deselect.req and waits for the response.
    pub async fn deselect(&mut self, id: u32) {
        self.send(HsmsMessage {
            header: HsmsHeader::control(MessageType::DeselectReq, 0, 0, SystemBytes::new(id)),
            body: Bytes::new(),
        })
        .await;
        let response = self.recv_answering_linktest().await;
        assert_eq!(response.message_type(), Some(MessageType::DeselectRsp));
    }

    /// Answers the session's Select.req with `status`.
    pub async fn answer_select(&mut self, status: SelectStatus) {
        let request = self.recv().await;
        assert_eq!(request.message_type(), Some(MessageType::SelectReq));
        self.send(HsmsMessage::select_rsp(request.system_bytes(), status))
            .await;
    }

    /// Waits until the session closes the socket, skipping frames.
    pub async fn expect_closed(&mut self) -> Vec<HsmsMessage> {
        let mut seen = Vec::new();
        timeout(WAIT, async {
            while let Some(Ok(frame)) = self.framed.next().await {
                seen.push(frame);
            }
        })
        .await
        .expect("link stayed open");
        seen
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Passive builder bound to a random loopback port.
pub fn passive() -> SessionBuilder {
    Session::builder().passive().address(LOCALHOST).port(0)
}

/// Enables a passive session and connects a selected peer to it.
pub async fn selected_passive(builder: SessionBuilder) -> (Session, Peer) {
    init_logging();
    let session = builder.build().expect("build");
    session.enable().await.expect("enable");

    let addr = session.local_addr().expect("bound address");
    let mut peer = Peer::connect(addr).await;
    peer.select().await;

    session
        .wait_for_state(ConnectionState::Selected, WAIT)
        .await
        .expect("selected");
    (session, peer)
}

/// Enables an active session against a scripted peer that accepts select.
pub async fn selected_active(builder: SessionBuilder) -> (Session, Peer) {
    init_logging();
    let listener = TcpListener::bind((LOCALHOST, 0)).await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let session = builder
        .active()
        .address(LOCALHOST)
        .port(port)
        .build()
        .expect("build");

    let enabling = tokio::spawn({
        let session = session.clone();
        async move { session.enable().await }
    });

    let (stream, _) = listener.accept().await.expect("accept");
    let mut peer = Peer::from_stream(stream);
    peer.answer_select(SelectStatus::Ok).await;

    enabling.await.expect("join").expect("enable");
    (session, peer)
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Recording Trace Sink
// ============================================================================

/// Trace sink that keeps every line for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl TraceSink for RecordingSink {
    fn message_in(&self, message: &SecsMessage, id: SystemBytes) {
        self.lines.lock().push(format!("in {id} {}", message.label()));
    }

    fn message_out(&self, message: &SecsMessage, id: SystemBytes) {
        self.lines.lock().push(format!("out {id} {}", message.label()));
    }

    fn info(&self, text: &str) {
        self.lines.lock().push(format!("info {text}"));
    }

    fn warning(&self, text: &str) {
        self.lines.lock().push(format!("warning {text}"));
    }

    fn error(&self, text: &str, error: Option<&Error>) {
        let detail = error.map(ToString::to_string).unwrap_or_default();
        self.lines.lock().push(format!("error {text} {detail}"));
    }

    fn debug(&self, text: &str) {
        self.lines.lock().push(format!("debug {text}"));
    }
}
