use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::headers::TypedHeader;
use crate::types::message::{HeaderAccess, MessageCore, SIP_VERSION};
use crate::types::status::StatusCode;

/// A SIP response: status-line plus the shared message core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub version: String,
    pub status: StatusCode,
    pub reason: String,
    pub core: MessageCore,
}

impl Response {
    /// A response with the canonical reason phrase and no headers
    pub fn new(status: StatusCode) -> Self {
        Response {
            version: SIP_VERSION.to_string(),
            status,
            reason: status.reason_phrase().to_string(),
            core: MessageCore::default(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_header(mut self, header: TypedHeader) -> Self {
        self.set_header(header);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn reason_phrase(&self) -> &str {
        &self.reason
    }

    pub fn is_provisional(&self) -> bool {
        self.status.is_provisional()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn start_line(&self) -> String {
        format!("{} {} {}", self.version, self.status.as_u16(), self.reason)
    }

    /// Parses and validates a response from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        match crate::parser::parse_message(data)? {
            crate::types::Message::Response(resp) => Ok(resp),
            crate::types::Message::Request(_) => Err(Error::MalformedStartLine(
                "expected a status line, found a request".to_string(),
            )),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}
