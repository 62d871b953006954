use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::error::{Error, Result};
use crate::transport::{
    Connection, Transport, TransportEvent, TransportKind, DEFAULT_CHANNEL_CAPACITY,
};

/// Largest datagram a reader accepts
pub const UDP_READ_BUFFER: usize = 65535;

const RECV_RETRY_MIN: Duration = Duration::from_millis(10);
const RECV_RETRY_MAX: Duration = Duration::from_secs(1);

/// Pause before reading again after `failures` consecutive recv errors
fn recv_retry_delay(failures: u32) -> Duration {
    RECV_RETRY_MIN
        .saturating_mul(1u32 << failures.saturating_sub(1).min(16))
        .min(RECV_RETRY_MAX)
}

/// UDP transport reading from one socket per core.
///
/// On platforms with `SO_REUSEPORT` load balancing every reader binds the
/// same address and the kernel spreads datagrams across them. Sends always
/// go out through the first socket.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    sockets: Vec<Arc<UdpSocket>>,
    local_addr: SocketAddr,
    closed: AtomicBool,
    readers: Mutex<Vec<JoinHandle<()>>>,
    events_tx: mpsc::Sender<TransportEvent>,
}

#[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
fn set_reuse_port(socket: &Socket) -> io::Result<()> {
    socket.set_reuse_port(true)
}

#[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
fn set_reuse_port(_socket: &Socket) -> io::Result<()> {
    Ok(())
}

fn reader_count() -> usize {
    if cfg!(all(unix, not(target_os = "macos"))) {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        1
    }
}

fn bind_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let bind_err = |source: io::Error| Error::BindFailed { addr, source };
    let socket =
        Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    set_reuse_port(&socket).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(bind_err)
}

impl UdpTransport {
    /// Binds the reader sockets and starts their receive loops
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let first = bind_socket(addr)?;
        let local_addr = first.local_addr()?;
        let mut sockets = vec![Arc::new(first)];
        // Later readers join the port the first one actually got
        for _ in 1..reader_count() {
            sockets.push(Arc::new(bind_socket(local_addr)?));
        }
        info!(addr = %local_addr, readers = sockets.len(), "SIP UDP transport bound");

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                sockets,
                local_addr,
                closed: AtomicBool::new(false),
                readers: Mutex::new(Vec::new()),
                events_tx,
            }),
        };

        let handles: Vec<_> = transport
            .inner
            .sockets
            .iter()
            .map(|socket| transport.spawn_receive_loop(socket.clone()))
            .collect();
        transport.inner.readers.lock().extend(handles);

        Ok((transport, events_rx))
    }

    fn spawn_receive_loop(&self, socket: Arc<UdpSocket>) -> JoinHandle<()> {
        let events_tx = self.inner.events_tx.clone();
        let local_addr = self.inner.local_addr;

        tokio::spawn(async move {
            let mut buf = vec![0u8; UDP_READ_BUFFER];
            let mut failures = 0u32;
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, source)) => {
                        failures = 0;
                        trace!(source = %source, len, "udp packet");
                        let event = TransportEvent::PacketReceived {
                            packet: Bytes::copy_from_slice(&buf[..len]),
                            source,
                            destination: local_addr,
                            connection: Connection::Udp {
                                socket: socket.clone(),
                                remote: source,
                            },
                        };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(addr = %local_addr, "udp recv failed: {}", e);
                        let event = TransportEvent::Error {
                            error: format!("udp recv failed: {}", e),
                        };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                        failures = failures.saturating_add(1);
                        tokio::time::sleep(recv_retry_delay(failures)).await;
                    }
                }
            }
            debug!(addr = %local_addr, "udp receive loop ended");
        })
    }

    /// Number of sockets reading the bound address
    pub fn reader_count(&self) -> usize {
        self.inner.sockets.len()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn connection(&self, remote: SocketAddr) -> Result<Connection> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let socket = self
            .inner
            .sockets
            .first()
            .cloned()
            .ok_or(Error::TransportClosed)?;
        Ok(Connection::Udp { socket, remote })
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for reader in self.inner.readers.lock().drain(..) {
            reader.abort();
        }
        let _ = self.inner.events_tx.try_send(TransportEvent::Closed);
        info!(addr = %self.inner.local_addr, "SIP UDP transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}
