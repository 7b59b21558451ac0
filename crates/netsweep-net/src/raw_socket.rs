//! Raw ICMP socket wrappers
//!
//! Thin `socket2` wrappers around the two OS handles the ICMP scanner owns:
//! a raw IPv4/ICMP socket for sends and a listening socket with a short read
//! deadline for receives. Creation fails without CAP_NET_RAW (or root); the
//! scanner treats any creation failure as "ICMP disabled" rather than an
//! abort.

use netsweep_core::{Error, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::debug;

/// Read deadline applied to listen sockets so cancellation stays responsive
pub const LISTEN_READ_DEADLINE: Duration = Duration::from_millis(100);

/// A raw IPv4 ICMP socket
#[derive(Debug)]
pub struct RawIcmpSocket {
    socket: Socket,
}

impl RawIcmpSocket {
    /// Create a raw ICMP socket for sending echo requests
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] when the socket cannot be created, which
    /// on most platforms means insufficient privileges.
    pub fn new() -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                Error::Network("permission denied for raw ICMP socket".to_string())
            } else {
                Error::Network(format!("failed to create raw ICMP socket: {}", e))
            }
        })?;

        debug!("created raw ICMP socket");
        Ok(Self { socket })
    }

    /// Create a raw ICMP socket for receiving replies
    ///
    /// The read deadline is preset to [`LISTEN_READ_DEADLINE`] so blocking
    /// reads return regularly and the listener can observe cancellation.
    pub fn listen() -> Result<Self> {
        let sock = Self::new()?;
        sock.set_read_timeout(Some(LISTEN_READ_DEADLINE))?;
        Ok(sock)
    }

    /// Send a framed ICMP message to `dst`
    pub fn send_to(&self, packet: &[u8], dst: Ipv4Addr) -> Result<usize> {
        let addr = SockAddr::from(SocketAddr::new(IpAddr::V4(dst), 0));
        self.socket
            .send_to(packet, &addr)
            .map_err(|e| Error::Network(format!("ICMP send to {} failed: {}", dst, e)))
    }

    /// Receive one datagram, returning the byte count and the IPv4 source.
    ///
    /// Returns the raw `io::Error` so callers can distinguish a deadline
    /// expiry (`WouldBlock`/`TimedOut`) from a real failure.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<Ipv4Addr>)> {
        let mut uninit: Vec<MaybeUninit<u8>> = vec![MaybeUninit::uninit(); buf.len()];
        let (size, addr) = self.socket.recv_from(&mut uninit)?;

        let size = size.min(buf.len());
        for (dst, src) in buf.iter_mut().zip(uninit.iter()).take(size) {
            // recv_from initialized the first `size` bytes
            *dst = unsafe { src.assume_init() };
        }

        let source = addr.as_socket().and_then(|s| match s.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        });
        Ok((size, source))
    }

    /// Adjust the blocking-read deadline
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket
            .set_read_timeout(timeout)
            .map_err(|e| Error::Network(format!("failed to set read timeout: {}", e)))
    }
}

/// Whether `err` is the benign expiry of a read deadline
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // Raw sockets need CAP_NET_RAW; these tests exercise whichever path the
    // environment permits and never fail for lack of privilege.

    #[test]
    fn test_create_or_permission_denied() {
        match RawIcmpSocket::new() {
            Ok(_) => {}
            Err(Error::Network(msg)) => {
                assert!(msg.contains("ICMP socket"), "unexpected message: {}", msg)
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_listen_sets_deadline() {
        let Ok(sock) = RawIcmpSocket::listen() else {
            return; // unprivileged environment
        };

        // With no traffic, a read must return within the deadline
        let mut buf = [0u8; 256];
        let start = std::time::Instant::now();
        match sock.recv_from(&mut buf) {
            Ok(_) => {} // stray ICMP traffic is possible
            Err(e) => assert!(is_timeout(&e), "unexpected error: {}", e),
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_send_to_loopback() {
        let Ok(sock) = RawIcmpSocket::new() else {
            return;
        };
        let packet = crate::icmp::EchoRequest::new(1, 1).encode();
        let sent = sock.send_to(&packet, Ipv4Addr::LOCALHOST).unwrap();
        assert_eq!(sent, packet.len());
    }

    #[test]
    fn test_is_timeout_kinds() {
        assert!(is_timeout(&io::Error::new(io::ErrorKind::WouldBlock, "w")));
        assert!(is_timeout(&io::Error::new(io::ErrorKind::TimedOut, "t")));
        assert!(!is_timeout(&io::Error::new(
            io::ErrorKind::PermissionDenied,
            "p"
        )));
    }
}
