//! Byte transports for the sipstack SIP engine
//!
//! This crate binds UDP and TCP endpoints and moves raw bytes. It reports
//! received packets on a bounded event channel together with the
//! [`Connection`] they arrived on, so the layer above can answer over the
//! same path. TCP streams are cut into individual messages by
//! [`StreamFramer`].

pub mod error;
pub mod events;
pub mod transport;


pub use error::{Error, Result};
pub use transport::tcp::{StreamFramer, TcpTransport};
pub use transport::udp::UdpTransport;
pub use transport::{
    bind_transport, Connection, TcpConnection, Transport, TransportEvent, TransportKind,
};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

/// Bind a TCP transport to the specified address
pub async fn bind_tcp(
    addr: std::net::SocketAddr,
) -> Result<(TcpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    TcpTransport::bind(addr, None).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        bind_tcp, bind_transport, bind_udp, Connection, Error, Result, TcpTransport, Transport,
        TransportEvent, TransportKind, UdpTransport,
    };
}
