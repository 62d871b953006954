//! Events a transport reports to its owner.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::transport::Connection;

/// Notifications emitted on a transport's event channel
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One complete datagram, or one reassembled message from a stream
    PacketReceived {
        packet: Bytes,
        source: SocketAddr,
        destination: SocketAddr,
        /// Connection the packet arrived on, usable for replies
        connection: Connection,
    },

    /// A TCP connection was accepted or dialed and added to the cache
    Connected { remote: SocketAddr },

    /// A TCP connection closed and was removed from the cache
    Disconnected { remote: SocketAddr },

    /// A read failed; the transport keeps running
    Error { error: String },

    /// The transport stopped reading
    Closed,
}
