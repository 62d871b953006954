use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::headers::TypedHeader;
use crate::types::message::{HeaderAccess, MessageCore, SIP_VERSION};
use crate::types::method::Method;
use crate::types::sip_response::Response;
use crate::types::status::StatusCode;
use crate::types::uri::SipUri;

/// A SIP request: request-line plus the shared message core.
///
/// `Clone` is a deep copy, so bumping the CSeq of a resubmission never
/// touches the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: SipUri,
    pub version: String,
    pub core: MessageCore,
}

impl Request {
    pub fn new(method: Method, uri: SipUri) -> Self {
        Request {
            method,
            uri,
            version: SIP_VERSION.to_string(),
            core: MessageCore::default(),
        }
    }

    /// Builder-style header setter, overwriting any previous value
    pub fn with_header(mut self, header: TypedHeader) -> Self {
        self.set_header(header);
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.set_content(content_type, body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &SipUri {
        &self.uri
    }

    pub fn start_line(&self) -> String {
        format!("{} {} {}", self.method, self.uri, self.version)
    }

    /// Builds a response carrying this request's Via chain, From, To,
    /// Call-ID, CSeq and Max-Forwards.
    pub fn create_response(&self, status: StatusCode) -> Response {
        let mut response = Response::new(status);
        for via in self.core.headers.get_all(crate::types::HeaderName::Via) {
            // Via is not singular, so this cannot fail
            let _ = response.append_header(via.clone());
        }
        if let Some(from) = self.from() {
            response.set_header(TypedHeader::From(from.clone()));
        }
        if let Some(to) = self.to() {
            response.set_header(TypedHeader::To(to.clone()));
        }
        if let Some(call_id) = self.call_id() {
            response.set_header(TypedHeader::CallId(call_id.to_string()));
        }
        if let Some(cseq) = self.cseq() {
            response.set_header(TypedHeader::CSeq(cseq.clone()));
        }
        if let Some(hops) = self.max_forwards() {
            response.set_max_forwards(hops);
        }
        response
    }

    /// Clears the top Via branch so the request can start a new transaction
    pub fn clear_branch(&mut self) {
        if let Some(via) = self.via_mut() {
            via.set_branch("");
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.via().and_then(|via| via.branch())
    }

    pub fn remove_from_tag(&mut self) {
        if let Some(from) = self.from_mut() {
            from.set_tag("");
        }
    }

    /// Increments the CSeq number, returning the new value
    pub fn bump_cseq(&mut self) -> Option<u32> {
        self.cseq_mut().map(|cseq| {
            cseq.seq = cseq.seq.wrapping_add(1);
            cseq.seq
        })
    }

    /// Parses and validates a request from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        match crate::parser::parse_message(data)? {
            crate::types::Message::Request(req) => Ok(req),
            crate::types::Message::Response(_) => Err(crate::error::Error::MalformedStartLine(
                "expected a request, found a status line".to_string(),
            )),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}
