//! Error types for dialog-core
//!
//! [`Error`] covers everything the transaction, dialog and stack layers can
//! report synchronously. The outcome of waiting on a client transaction is
//! the narrower [`UacError`], which carries a stable numeric code for
//! callers that forward it over other interfaces.

mod uac;

use sipstack_sip_core::Method;
use sipstack_sip_transport::TransportKind;

pub use uac::UacError;

/// Result alias used throughout dialog-core
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transaction, dialog and stack layers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Message parsing or validation failed
    #[error(transparent)]
    Sip(#[from] sipstack_sip_core::Error),

    /// Socket level failure
    #[error(transparent)]
    Transport(#[from] sipstack_sip_transport::Error),

    /// The Via transport of an inbound message disagrees with the socket it arrived on
    #[error("Via transport {via} does not match {connection} connection")]
    ViaTransportMismatch {
        via: String,
        connection: TransportKind,
    },

    #[error("transaction {0} already exists")]
    DuplicateTransaction(String),

    #[error("no transaction found for {0}")]
    TransactionNotFound(String),

    /// A request arrived but the stack has no listener to hand it to
    #[error("no event listener installed")]
    NoEventListener,

    #[error("no listening point for transport {0}")]
    NoListeningPoint(String),

    #[error("listening point is not started")]
    ListeningPointNotStarted,

    /// The next hop needs a different transport than the listening point offers
    #[error("hop transport {found} does not match listening point transport {expected}")]
    TransportMismatch {
        expected: TransportKind,
        found: String,
    },

    #[error("cannot resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("no dialog matches {0}")]
    DialogNotFound(String),

    #[error("dialog is terminated")]
    DialogTerminated,

    /// ACK and CANCEL belong to their original transaction, not to the dialog
    #[error("method {0} cannot be created within a dialog")]
    InvalidDialogMethod(Method),

    #[error("CSeq {received} is lower than the last remote sequence {last}")]
    OutOfOrderSequence { last: u32, received: u32 },

    #[error("response has no Contact header")]
    MissingContact,

    #[error("refresh interval must be positive")]
    InvalidRefreshInterval,

    #[error("response {code} {reason}")]
    UnexpectedStatus { code: u16, reason: String },

    /// A response was submitted in a state that does not accept it
    #[error("transaction is {0} and cannot send this response")]
    InvalidTransactionState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Uac(#[from] UacError),
}

impl From<sipstack_infra_common::Error> for Error {
    fn from(err: sipstack_infra_common::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::OutOfOrderSequence { last: 5, received: 3 };
        assert_eq!(err.to_string(), "CSeq 3 is lower than the last remote sequence 5");

        let err = Error::ViaTransportMismatch {
            via: "TCP".to_string(),
            connection: TransportKind::Udp,
        };
        assert_eq!(err.to_string(), "Via transport TCP does not match UDP connection");

        let err: Error = UacError::TransactionTimeout.into();
        assert!(matches!(err, Error::Uac(UacError::TransactionTimeout)));
    }
}
