use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::{Error, Result};

/// Path to one peer: the shared UDP socket plus a destination, or a TCP stream
#[derive(Clone)]
pub enum Connection {
    Udp {
        socket: Arc<UdpSocket>,
        remote: SocketAddr,
    },
    Tcp(Arc<TcpConnection>),
}

impl Connection {
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        match self {
            Connection::Udp { socket, remote } => {
                trace!(remote = %remote, len = data.len(), "udp send");
                socket
                    .send_to(data, remote)
                    .await
                    .map_err(|source| Error::SendFailed {
                        addr: *remote,
                        source,
                    })?;
                Ok(())
            }
            Connection::Tcp(conn) => conn.send(data).await,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        match self {
            Connection::Udp { remote, .. } => *remote,
            Connection::Tcp(conn) => conn.remote_addr(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            Connection::Udp { socket, .. } => Ok(socket.local_addr()?),
            Connection::Tcp(conn) => Ok(conn.local_addr()),
        }
    }

    pub fn is_reliable(&self) -> bool {
        matches!(self, Connection::Tcp(_))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connection::Udp { remote, .. } => write!(f, "Connection::Udp({})", remote),
            Connection::Tcp(conn) => write!(f, "Connection::Tcp({} -> {})", conn.local, conn.remote),
        }
    }
}

/// Write side of a cached TCP connection. The read side is owned by the
/// connection's reader task.
pub struct TcpConnection {
    local: SocketAddr,
    remote: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    closed: AtomicBool,
}

impl TcpConnection {
    pub(crate) fn new(local: SocketAddr, remote: SocketAddr, writer: OwnedWriteHalf) -> Self {
        TcpConnection {
            local,
            remote,
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn send(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        trace!(remote = %self.remote, len = data.len(), "tcp send");
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(|source| Error::SendFailed {
                addr: self.remote,
                source,
            })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.writer.lock().await.shutdown().await;
        }
    }
}
