use std::fmt;

use thiserror::Error;

use crate::types::HeaderName;

/// A type alias for handling `Result`s with `Error` values
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, parsing or validating SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The request-line or status-line could not be parsed
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),

    /// A header line is not of the form `Name: value`
    #[error("malformed message at line {line:?}: {reason}")]
    MalformedMessage { line: String, reason: String },

    /// Header name outside the supported registry
    #[error("unknown header: {0}")]
    UnknownHeader(String),

    /// Content-Length declares more bytes than the buffer holds
    #[error("truncated body: Content-Length is {declared} but only {available} bytes follow")]
    TruncatedBody { declared: usize, available: usize },

    /// A header the message cannot do without is absent
    #[error("missing mandatory header: {0}")]
    MissingMandatoryHeader(HeaderName),

    /// The CSeq method does not match the request-line method
    #[error("CSeq method {cseq} does not match request method {request}")]
    CSeqMethodMismatch { request: String, cseq: String },

    /// A second value was appended to a singular header
    #[error("duplicate header: {0}")]
    DuplicateHeader(HeaderName),

    /// A SIP URI could not be parsed
    #[error("invalid SIP URI: {0}")]
    InvalidUri(String),

    /// A structured header value could not be parsed
    #[error("invalid {name} header value {value:?}: {reason}")]
    InvalidHeader {
        name: HeaderName,
        value: String,
        reason: String,
    },

    /// Status code outside 100..=699
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Digest challenge or credentials are unusable
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Low-level combinator failure
    #[error("parser error: {0}")]
    Parser(String),
}

impl Error {
    pub(crate) fn invalid_header(
        name: HeaderName,
        value: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Error::InvalidHeader {
            name,
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors raised while reading bytes off the wire
    pub fn is_parse_error(&self) -> bool {
        !matches!(self, Error::Authentication(_) | Error::DuplicateHeader(_))
    }
}

impl<I: fmt::Debug> From<nom::Err<nom::error::Error<I>>> for Error {
    fn from(err: nom::Err<nom::error::Error<I>>) -> Self {
        Error::Parser(format!("{:?}", err))
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parser(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parser(s)
    }
}
