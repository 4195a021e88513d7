//! Datagram send/receive.
//!
//! `spec.md` excludes "the physical datagram socket binding" from the
//! core, but a usable crate still needs a working default: [`UdpTransport`]
//! wraps `tokio::net::UdpSocket`. [`Protocol`](crate::protocol::Protocol)
//! is generic over [`Transport`] so tests can swap in an
//! in-process double instead of binding real sockets.
//!
//! `close()` has to actually interrupt an in-flight `recv()`, not just flip
//! a flag the next `recv()` call will check — otherwise a task already
//! blocked inside the socket read never learns the transport closed and
//! hangs forever. `recv()` races the socket read against a `Notify` that
//! `close()` fires, so a `recv()` call that's already parked wakes up with
//! [`DhtError::ConnectionClosed`] instead of waiting for a datagram that
//! will never arrive.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::{DhtError, Result};

/// Maximum datagram size this transport will read in one `recv`.
///
/// Generous enough for a `find_node`/`find_value` response carrying `k=20`
/// triples JSON-encoded; real deployments sized for a larger `k` or chunkier
/// values should raise this.
const MAX_DATAGRAM_BYTES: usize = 16 * 1024;

/// Connectionless datagram transport, addressed by `(host, port)`.
pub trait Transport: Send + Sync + 'static {
    /// Send `bytes` to `address`. Best-effort: the caller does not learn
    /// whether the remote peer actually received it.
    fn send(
        &self,
        bytes: &[u8],
        address: SocketAddr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Wait for the next inbound datagram and its source address.
    fn recv(&self) -> impl std::future::Future<Output = Result<(Vec<u8>, SocketAddr)>> + Send;

    /// Close the transport. Subsequent `send`/`recv` calls fail with
    /// [`DhtError::ConnectionClosed`].
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// The default [`Transport`]: a bound `UdpSocket`.
pub struct UdpTransport {
    socket: UdpSocket,
    closed: AtomicBool,
    shutdown: Notify,
}

impl UdpTransport {
    /// Bind a UDP socket at `address` (use port `0` for an ephemeral port).
    pub async fn bind(address: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|e| DhtError::ConnectionError(e.to_string()))?;
        Ok(Self {
            socket,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// The address this transport is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| DhtError::ConnectionError(e.to_string()))
    }
}

impl Transport for UdpTransport {
    async fn send(&self, bytes: &[u8], address: SocketAddr) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DhtError::ConnectionClosed);
        }
        self.socket
            .send_to(bytes, address)
            .await
            .map(|_| ())
            .map_err(|e| DhtError::ConnectionError(e.to_string()))
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        // Registering interest in the notification before checking `closed`
        // (rather than after) is what makes this race-free: `Notify`
        // guarantees a `notified()` future created before a `notify_waiters()`
        // call will still fire, even though nothing has polled it yet. Without
        // this ordering, `close()` could run between our `closed` check and
        // the `recv_from` call below and leave this task blocked forever with
        // nothing left to wake it.
        let shutdown = self.shutdown.notified();

        if self.closed.load(Ordering::Acquire) {
            return Err(DhtError::ConnectionClosed);
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        tokio::select! {
            _ = shutdown => Err(DhtError::ConnectionClosed),
            result = self.socket.recv_from(&mut buf) => {
                let (len, source) = result.map_err(|e| DhtError::ConnectionError(e.to_string()))?;
                buf.truncate(len);
                Ok((buf, source))
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
    }
}
