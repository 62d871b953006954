//! TCP transport: a listener plus a cache of live connections keyed by peer
//! address. Accepted and dialed connections share the cache, so a response
//! goes back over the connection its request arrived on.

mod framing;

pub use framing::{StreamFramer, MAX_HEADER_SIZE, MAX_MESSAGE_SIZE};

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::transport::{
    Connection, TcpConnection, Transport, TransportEvent, TransportKind, DEFAULT_CHANNEL_CAPACITY,
};

/// Read buffer for connections accepted by the listener
pub const ACCEPTED_READ_BUFFER: usize = 4000;
/// Read buffer for connections this side dialed
pub const DIALED_READ_BUFFER: usize = 16000;

const LISTEN_BACKLOG: i32 = 1024;

#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TcpTransportInner>,
}

struct CachedConnection {
    conn: Arc<TcpConnection>,
    reader: Option<AbortHandle>,
}

struct TcpTransportInner {
    local_addr: SocketAddr,
    connections: DashMap<SocketAddr, CachedConnection>,
    closed: AtomicBool,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    events_tx: mpsc::Sender<TransportEvent>,
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let bind_err = |source: io::Error| Error::BindFailed { addr, source };
    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(bind_err)
}

impl TcpTransport {
    /// Binds the listener and starts accepting connections
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "SIP TCP transport bound");

        let transport = TcpTransport {
            inner: Arc::new(TcpTransportInner {
                local_addr,
                connections: DashMap::new(),
                closed: AtomicBool::new(false),
                acceptor: Mutex::new(None),
                events_tx,
            }),
        };

        let acceptor = tokio::spawn(accept_loop(Arc::downgrade(&transport.inner), listener));
        *transport.inner.acceptor.lock() = Some(acceptor);

        Ok((transport, events_rx))
    }

    /// Number of cached connections
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }
}

impl TcpTransportInner {
    /// Caches the connection and spawns its reader
    fn register(self: &Arc<Self>, stream: TcpStream, buffer_size: usize) -> Result<Arc<TcpConnection>> {
        let remote = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let conn = Arc::new(TcpConnection::new(local, remote, writer));
        self.connections.insert(
            remote,
            CachedConnection {
                conn: conn.clone(),
                reader: None,
            },
        );
        let _ = self.events_tx.try_send(TransportEvent::Connected { remote });

        let handle = tokio::spawn(read_loop(
            Arc::downgrade(self),
            conn.clone(),
            reader,
            buffer_size,
            self.events_tx.clone(),
        ));
        if let Some(mut cached) = self.connections.get_mut(&remote) {
            if Arc::ptr_eq(&cached.conn, &conn) {
                cached.reader = Some(handle.abort_handle());
            }
        }
        debug!(remote = %remote, local = %local, "tcp connection registered");
        Ok(conn)
    }

    fn forget(&self, conn: &Arc<TcpConnection>) {
        let remote = conn.remote_addr();
        if self
            .connections
            .remove_if(&remote, |_, cached| Arc::ptr_eq(&cached.conn, conn))
            .is_some()
        {
            let _ = self.events_tx.try_send(TransportEvent::Disconnected { remote });
        }
    }
}

async fn accept_loop(inner: Weak<TcpTransportInner>, listener: TcpListener) {
    loop {
        let accepted = listener.accept().await;
        let Some(transport) = inner.upgrade() else {
            break;
        };
        match accepted {
            Ok((stream, remote)) => {
                debug!(remote = %remote, "accepted tcp connection");
                if let Err(e) = transport.register(stream, ACCEPTED_READ_BUFFER) {
                    warn!(remote = %remote, "failed to register tcp connection: {}", e);
                }
            }
            Err(e) => {
                error!(addr = %transport.local_addr, "accept tcp connection failed: {}", e);
                let _ = transport.events_tx.try_send(TransportEvent::Error {
                    error: format!("accept failed: {}", e),
                });
            }
        }
    }
}

async fn read_loop(
    inner: Weak<TcpTransportInner>,
    conn: Arc<TcpConnection>,
    mut reader: OwnedReadHalf,
    buffer_size: usize,
    events_tx: mpsc::Sender<TransportEvent>,
) {
    let remote = conn.remote_addr();
    let local = conn.local_addr();
    let mut framer = StreamFramer::new();
    let mut buf = vec![0u8; buffer_size];

    'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(remote = %remote, "tcp peer closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                error!(remote = %remote, "tcp recv failed: {}", e);
                break;
            }
        };
        trace!(remote = %remote, len = n, "tcp read");
        framer.push(&buf[..n]);

        loop {
            match framer.next_frame() {
                Ok(Some(packet)) => {
                    let event = TransportEvent::PacketReceived {
                        packet,
                        source: remote,
                        destination: local,
                        connection: Connection::Tcp(conn.clone()),
                    };
                    if events_tx.send(event).await.is_err() {
                        break 'read;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(remote = %remote, "dropping tcp connection: {}", e);
                    let _ = events_tx.try_send(TransportEvent::Error {
                        error: e.to_string(),
                    });
                    break 'read;
                }
            }
        }
    }

    conn.shutdown().await;
    if let Some(inner) = inner.upgrade() {
        inner.forget(&conn);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn connection(&self, remote: SocketAddr) -> Result<Connection> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let cached = self
            .inner
            .connections
            .get(&remote)
            .map(|cached| cached.conn.clone());
        if let Some(conn) = cached {
            if !conn.is_closed() {
                return Ok(Connection::Tcp(conn));
            }
            self.inner.forget(&conn);
        }

        debug!(remote = %remote, "dialing tcp connection");
        let stream = TcpStream::connect(remote)
            .await
            .map_err(|source| Error::ConnectFailed {
                addr: remote,
                source,
            })?;
        let conn = self.inner.register(stream, DIALED_READ_BUFFER)?;
        Ok(Connection::Tcp(conn))
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(acceptor) = self.inner.acceptor.lock().take() {
            acceptor.abort();
        }

        let cached: Vec<_> = self
            .inner
            .connections
            .iter()
            .map(|entry| {
                if let Some(reader) = &entry.reader {
                    reader.abort();
                }
                entry.conn.clone()
            })
            .collect();
        self.inner.connections.clear();
        for conn in cached {
            conn.shutdown().await;
        }

        let _ = self.inner.events_tx.try_send(TransportEvent::Closed);
        info!(addr = %self.inner.local_addr, "SIP TCP transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TcpTransport({}, {} connections)",
            self.inner.local_addr,
            self.inner.connections.len()
        )
    }
}
