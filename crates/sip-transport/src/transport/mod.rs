//! Transport abstraction: a bound local endpoint that moves raw bytes.
//!
//! Transports know nothing about SIP beyond stream framing. Each one owns a
//! bounded event channel on which it reports received packets and
//! connection changes.

mod connection;
pub mod tcp;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
pub use crate::events::TransportEvent;

pub use connection::{Connection, TcpConnection};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// Default capacity of a transport's event channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Protocol a listening point speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportKind {
    #[serde(alias = "udp")]
    Udp,
    #[serde(alias = "tcp")]
    Tcp,
}

impl TransportKind {
    /// Uppercase name as written in Via headers
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
        }
    }

    /// Reliable transports disable retransmission timers
    pub fn is_reliable(&self) -> bool {
        matches!(self, TransportKind::Tcp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("udp") {
            Ok(TransportKind::Udp)
        } else if s.eq_ignore_ascii_case("tcp") {
            Ok(TransportKind::Tcp)
        } else {
            Err(Error::UnsupportedTransport(s.to_string()))
        }
    }
}

/// A bound transport endpoint
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn kind(&self) -> TransportKind;

    /// Address actually bound, with the kernel-assigned port when bound to 0
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Connection toward `remote`. UDP wraps the shared socket; TCP returns
    /// the cached connection or dials a new one.
    async fn connection(&self, remote: SocketAddr) -> Result<Connection>;

    async fn send(&self, data: &[u8], remote: SocketAddr) -> Result<()> {
        self.connection(remote).await?.send(data).await
    }

    /// Stops the read loops and drops cached connections
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Binds a transport of the given kind, returning it with its event channel
pub async fn bind_transport(
    kind: TransportKind,
    addr: SocketAddr,
    channel_capacity: Option<usize>,
) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
    match kind {
        TransportKind::Udp => {
            let (transport, rx) = UdpTransport::bind(addr, channel_capacity).await?;
            Ok((Arc::new(transport), rx))
        }
        TransportKind::Tcp => {
            let (transport, rx) = TcpTransport::bind(addr, channel_capacity).await?;
            Ok((Arc::new(transport), rx))
        }
    }
}
