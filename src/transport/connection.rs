//! HSMS connection and event loop.
//!
//! This module owns the framed TCP stream of one link and hands every
//! decoded frame to a single [`FrameHandler`].
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming frames from the peer (delivered to the handler)
//! - Outgoing frames queued by the session, written in queue order
//! - Shutdown requests (queued frames are flushed first)
//!
//! The loop never correlates messages; that is the session's job.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::HsmsMessage;

use super::codec::HsmsCodec;

// ============================================================================
// FrameHandler
// ============================================================================

/// Intake for frames read from the link.
///
/// Called from the connection's event loop task.
pub trait FrameHandler: Send + Sync + 'static {
    /// Called once per decoded frame, in arrival order.
    fn on_frame(&self, frame: HsmsMessage);

    /// Called once when the link fails or the peer closes it.
    ///
    /// Not called after a local [`Connection::shutdown`].
    fn on_closed(&self, error: Option<Error>);
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a frame.
    Send(HsmsMessage),
    /// Flush and close the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to a running HSMS link.
///
/// Cloning is cheap; all clones feed the same event loop.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Remote address.
    peer_addr: SocketAddr,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Wraps a connected stream and spawns its event loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the peer address cannot be read.
    pub fn spawn(
        stream: TcpStream,
        codec: HsmsCodec,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let framed = Framed::new(stream, codec);

        tokio::spawn(Self::run_event_loop(framed, command_rx, handler));

        debug!(%peer_addr, "Connection event loop started");

        Ok(Self {
            command_tx,
            peer_addr,
        })
    }

    /// Queues a frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the event loop has stopped.
    pub fn send(&self, frame: HsmsMessage) -> Result<()> {
        self.command_tx
            .send(ConnectionCommand::Send(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Flushes queued frames and closes the socket.
    ///
    /// Idempotent. No frame is delivered to the handler once the loop has
    /// processed the request.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Returns `true` once the event loop has exited.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Returns the remote address.
    #[inline]
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Event loop that handles socket I/O.
    async fn run_event_loop(
        mut framed: Framed<TcpStream, HsmsCodec>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        handler: Arc<dyn FrameHandler>,
    ) {
        loop {
            tokio::select! {
                biased;

                // Commands from the session
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(frame)) => {
                            let id = frame.system_bytes();
                            if let Err(e) = framed.send(frame).await {
                                warn!(error = %e, %id, "Failed to write frame");
                                handler.on_closed(Some(e));
                                break;
                            }
                            trace!(%id, "Frame written");
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = framed.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = framed.close().await;
                            break;
                        }
                    }
                }

                // Incoming frames from the peer
                frame = framed.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            trace!(id = %frame.system_bytes(), stype = frame.header.stype, "Frame received");
                            handler.on_frame(frame);
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "Link read failed");
                            handler.on_closed(Some(e));
                            break;
                        }

                        None => {
                            debug!("Peer closed the link");
                            handler.on_closed(None);
                            break;
                        }
                    }
                }
            }
        }

        debug!("Connection event loop terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::time::timeout;

    use crate::identifiers::SystemBytes;

    /// Forwards everything the loop delivers to a channel.
    struct ChannelHandler {
        frames: UnboundedSender<HsmsMessage>,
        closed: Mutex<Vec<bool>>,
    }

    impl FrameHandler for ChannelHandler {
        fn on_frame(&self, frame: HsmsMessage) {
            let _ = self.frames.send(frame);
        }

        fn on_closed(&self, error: Option<Error>) {
            self.closed.lock().push(error.is_some());
        }
    }

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (local, remote) = pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = Arc::new(ChannelHandler {
            frames: tx,
            closed: Mutex::new(Vec::new()),
        });

        let connection = Connection::spawn(local, HsmsCodec::default(), handler).unwrap();
        let mut peer = Framed::new(remote, HsmsCodec::default());

        connection
            .send(HsmsMessage::linktest_req(SystemBytes::new(3)))
            .unwrap();
        let seen = peer.next().await.unwrap().unwrap();
        assert_eq!(seen.system_bytes(), SystemBytes::new(3));

        peer.send(HsmsMessage::linktest_rsp(SystemBytes::new(3)))
            .await
            .unwrap();
        let delivered = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, HsmsMessage::linktest_rsp(SystemBytes::new(3)));

        connection.shutdown();
    }

    #[tokio::test]
    async fn test_peer_close_reported_once() {
        let (local, remote) = pair().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let handler = Arc::new(ChannelHandler {
            frames: tx,
            closed: Mutex::new(Vec::new()),
        });

        let connection =
            Connection::spawn(local, HsmsCodec::default(), handler.clone() as Arc<dyn FrameHandler>).unwrap();
        drop(remote);

        timeout(Duration::from_secs(2), async {
            while !connection.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(handler.closed.lock().len(), 1);
        assert!(matches!(
            connection.send(HsmsMessage::linktest_req(SystemBytes::new(1))),
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_frames() {
        let (local, remote) = pair().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let handler = Arc::new(ChannelHandler {
            frames: tx,
            closed: Mutex::new(Vec::new()),
        });

        let connection =
            Connection::spawn(local, HsmsCodec::default(), handler.clone() as Arc<dyn FrameHandler>).unwrap();
        connection
            .send(HsmsMessage::separate_req(SystemBytes::new(8)))
            .unwrap();
        connection.shutdown();
        connection.shutdown();

        let mut peer = Framed::new(remote, HsmsCodec::default());
        let last = peer.next().await.unwrap().unwrap();
        assert_eq!(last, HsmsMessage::separate_req(SystemBytes::new(8)));
        assert!(peer.next().await.is_none());
        assert!(handler.closed.lock().is_empty());
    }
}
