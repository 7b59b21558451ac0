//! NetSweep network plumbing
//!
//! This crate owns everything that touches the wire below the scanners:
//!
//! - [`icmp`]: bit-exact ICMP echo framing and the RFC 1071 Internet checksum
//! - [`raw_socket`]: `socket2` raw-socket wrappers for echo send/receive
//! - [`socket_pool`]: a bounded, refcounted pool of ICMP listen sockets
//!
//! # Example
//!
//! ```
//! use netsweep_net::icmp::{checksum, EchoRequest};
//!
//! let packet = EchoRequest::new(0x1234, 1).encode();
//! // A framed message sums to zero under the Internet checksum
//! assert_eq!(checksum(&packet), 0);
//! ```

pub mod icmp;
pub mod raw_socket;
pub mod socket_pool;

pub use icmp::{EchoReply, EchoRequest};
pub use raw_socket::RawIcmpSocket;
pub use socket_pool::{IcmpSocketPool, PooledSocket};
