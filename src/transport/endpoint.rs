//! TCP endpoints for the two connection roles.
//!
//! - **Active**: [`connect`] dials the peer, bounded by the T5 connect
//!   timeout.
//! - **Passive**: [`Listener::bind`] binds the local port, then
//!   [`Listener::accept`] waits for the peer.
//!
//! Bind and connect failures surface as [`Error::Connection`].

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{Error, Result};

// ============================================================================
// Active
// ============================================================================

/// Opens an outbound connection to `ip:port`.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the connection is refused, fails, or
/// does not complete within `connect_timeout`.
pub async fn connect(ip: IpAddr, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let addr = SocketAddr::new(ip, port);
    debug!(%addr, "Connecting");

    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            info!(%addr, "Connected");
            Ok(stream)
        }
        Ok(Err(e)) => Err(Error::connection(format!("connect to {addr} failed: {e}"))),
        Err(_) => Err(Error::connection(format!(
            "connect to {addr} timed out after {}ms",
            connect_timeout.as_millis()
        ))),
    }
}

// ============================================================================
// Listener
// ============================================================================

/// A bound passive endpoint that has not yet accepted its peer.
#[derive(Debug)]
pub struct Listener {
    /// TCP listener for the incoming connection.
    listener: TcpListener,
    /// Address the listener is bound to.
    local_addr: SocketAddr,
}

impl Listener {
    /// Binds to `ip:port`.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if binding fails (e.g. address in use).
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::connection(format!("bind {addr} failed: {e}")))?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "Listener bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Waits for the peer to connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if accepting fails.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::connection(format!("accept failed: {e}")))?;

        info!(%peer, local = %self.local_addr, "Peer connected");

        Ok((stream, peer))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_bind_random_port() {
        let listener = Listener::bind(LOCALHOST, 0)
            .await
            .expect("bind should succeed");

        assert!(listener.port() > 0);
        assert_eq!(listener.local_addr().ip(), LOCALHOST);
    }

    #[tokio::test]
    async fn test_bind_port_in_use() {
        let first = Listener::bind(LOCALHOST, 0).await.unwrap();
        let second = Listener::bind(LOCALHOST, first.port()).await;

        assert!(matches!(second, Err(Error::Connection { .. })));
    }

    #[tokio::test]
    async fn test_connect_and_accept() {
        let listener = Listener::bind(LOCALHOST, 0).await.unwrap();
        let port = listener.port();

        let (client, accepted) = tokio::join!(
            connect(LOCALHOST, port, Duration::from_secs(2)),
            listener.accept()
        );

        let client = client.expect("connect should succeed");
        let (_, peer) = accepted.expect("accept should succeed");
        assert_eq!(client.local_addr().unwrap(), peer);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = Listener::bind(LOCALHOST, 0).await.unwrap().port();

        let result = connect(LOCALHOST, port, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
