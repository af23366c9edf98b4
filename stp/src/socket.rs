//! Datagram channel abstraction and its UDP implementation.
//!
//! The protocol core never touches a concrete socket type. It talks to a
//! [`Channel`]: a connected, bidirectional, message-oriented pipe carrying
//! whole datagrams. [`Socket`] is the production implementation, a thin
//! wrapper around a bound and connected `tokio::net::UdpSocket`. Test
//! implementations live in [`crate::simulator`].
//!
//! All methods take `&self` so one channel can be shared (via `Arc`) between
//! the ACK-processing task, timer tasks and the driving task.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Maximum datagram size we ever read (header + the largest MSS we accept).
pub const MAX_DATAGRAM: usize = 65_535;

/// A connected datagram channel.
pub trait Channel: Send + Sync + 'static {
    /// Send one datagram to the peer; returns the number of bytes sent.
    fn send(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive one datagram into `buf`; returns its length.
    ///
    /// Waits until a datagram arrives. A refused peer surfaces as
    /// `io::ErrorKind::ConnectionRefused`.
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// A UDP socket bound to a local address and connected to one peer.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new, unconnected socket to `local_addr`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Restrict the socket to exchanging datagrams with `peer` only.
    pub async fn connect(&self, peer: SocketAddr) -> io::Result<()> {
        self.inner.connect(peer).await
    }

    /// Bind to `local_addr` and connect to `peer` in one step.
    pub async fn open(local_addr: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let socket = Self::bind(local_addr).await?;
        socket.connect(peer).await?;
        log::debug!("[stp:socket] {} connected to {peer}", socket.local_addr);
        Ok(socket)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

impl Channel for Socket {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.send(buf).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf).await
    }
}
