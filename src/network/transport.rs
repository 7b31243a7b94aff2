//! UDP transport
//!
//! One bound-and-connected socket per session: datagrams go to the
//! configured peer and only the peer's datagrams are received. There
//! are no timeouts anywhere; a live stream has no use for late data, so
//! failures are reported immediately and never retried.
//!
//! Cancellation works by shutting down the socket's read half, which
//! unblocks a receiver parked in `recv` without killing its thread.
//!
//! Because the socket is connected, a peer that is not up yet reflects
//! our own datagrams back as ICMP port-unreachable, which the kernel
//! delivers to `send`/`recv` as `ECONNREFUSED`. That is reported as
//! [`NetworkError::PeerUnreachable`] so callers can tell "peer not
//! started" apart from a broken socket.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::NetworkError;

/// Point-to-point UDP transport
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Bind `listen_port` and connect to `peer`.
    ///
    /// Port 0 binds an ephemeral port (useful for tests).
    pub fn bind(listen_port: u16, peer: SocketAddr) -> Result<Self, NetworkError> {
        let domain = Domain::for_address(peer);
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let local_ip: IpAddr = if peer.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        let local = SocketAddr::new(local_ip, listen_port);
        socket
            .bind(&local.into())
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        socket
            .connect(&peer.into())
            .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;

        Ok(Self {
            socket: socket.into(),
            peer,
            closed: AtomicBool::new(false),
        })
    }

    /// Send one datagram to the peer. Fire-and-forget: a failure is an
    /// error for the caller to log, never to retry.
    pub fn send(&self, datagram: &[u8]) -> Result<(), NetworkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::Closed);
        }
        match self.socket.send(datagram) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Err(NetworkError::PeerUnreachable(e.to_string()))
            }
            Err(e) => Err(NetworkError::SendFailed(e.to_string())),
        }
    }

    /// Block until one datagram arrives from the peer; returns its
    /// length. Returns [`NetworkError::Closed`] once [`shutdown`] has
    /// been called, and [`NetworkError::PeerUnreachable`] when the
    /// kernel delivers a pending ICMP port-unreachable instead of data.
    ///
    /// [`shutdown`]: UdpTransport::shutdown
    pub fn receive(&self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::Closed);
        }
        match self.socket.recv(buf) {
            // A shut-down read half reports end-of-stream.
            Ok(0) if self.closed.load(Ordering::Acquire) => Err(NetworkError::Closed),
            Ok(n) => Ok(n),
            Err(_) if self.closed.load(Ordering::Acquire) => Err(NetworkError::Closed),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Err(NetworkError::PeerUnreachable(e.to_string()))
            }
            Err(e) => Err(NetworkError::ReceiveFailed(e.to_string())),
        }
    }

    /// Shut down the read half, unblocking any receiver. Idempotent.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = SockRef::from(&self.socket).shutdown(std::net::Shutdown::Read);
            tracing::debug!("transport shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
