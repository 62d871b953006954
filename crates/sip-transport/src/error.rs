use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A type alias for handling `Result`s with `Error` values
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the UDP and TCP transports
#[derive(Error, Debug)]
pub enum Error {
    /// Binding a local socket failed
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Dialing a TCP peer failed
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Writing to a socket failed
    #[error("failed to send to {addr}: {source}")]
    SendFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The transport or connection has been closed
    #[error("transport is closed")]
    TransportClosed,

    /// A stream header block grew past the reassembly limit without terminating
    #[error("stream frame exceeds {limit} bytes without a header terminator")]
    FrameTooLarge { limit: usize },

    /// Transport name other than UDP or TCP
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
