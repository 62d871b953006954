use std::fmt;

/// Failure of a client transaction wait.
///
/// Exactly one of these, or a final response, resolves each
/// [`ClientTransaction`](crate::transaction::ClientTransaction).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UacError {
    /// Timer B or F fired before a final response
    #[error("transaction timed out")]
    TransactionTimeout,

    /// Writing to the transport failed
    #[error("I/O error: {0}")]
    IoException(String),

    /// The per-request deadline expired first
    #[error("request timed out")]
    RequestTimeout,

    /// The transaction was already started
    #[error("transaction already started")]
    InvalidState,
}

impl UacError {
    pub(crate) fn io(err: impl fmt::Display) -> Self {
        UacError::IoException(err.to_string())
    }

    /// Stable numeric code
    pub fn code(&self) -> u8 {
        match self {
            UacError::TransactionTimeout => 1,
            UacError::IoException(_) => 2,
            UacError::RequestTimeout => 3,
            UacError::InvalidState => 4,
        }
    }
}
