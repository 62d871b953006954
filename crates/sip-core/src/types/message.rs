//! Behaviour shared by requests and responses.
//!
//! [`Request`] and [`Response`] each own a [`MessageCore`] (headers, body and
//! transport metadata). The [`HeaderAccess`] trait provides the typed
//! accessors on top of it, so the two message kinds differ only in their
//! start line and in the mandatory-header checks.

use std::fmt;
use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::address::Address;
use crate::types::headers::{
    Auth, CSeq, Event, HeaderName, Headers, SubscriptionState, TypedHeader,
};
use crate::types::method::Method;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use crate::types::via::Via;

/// Protocol version written in start lines
pub const SIP_VERSION: &str = "SIP/2.0";

/// Headers, body and transport metadata common to both message kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCore {
    pub headers: Headers,
    pub body: Bytes,
    /// Peer the message came from, set by the receiving stack
    #[serde(skip)]
    pub source: Option<SocketAddr>,
    /// Local address the message arrived on
    #[serde(skip)]
    pub destination: Option<SocketAddr>,
}

impl MessageCore {
    /// Writes the header block, the blank line and the body after `start_line`.
    /// Content-Length always reflects the attached body.
    pub(crate) fn encode(&self, start_line: &str) -> Bytes {
        let mut head = String::with_capacity(512);
        head.push_str(start_line);
        head.push_str("\r\n");
        for header in self.headers.iter() {
            if header.name() == HeaderName::ContentLength {
                continue;
            }
            head.push_str(&format!("{}: {}\r\n", header.name(), header));
        }
        head.push_str(&format!("{}: {}\r\n\r\n", HeaderName::ContentLength, self.body.len()));

        let mut buf = BytesMut::with_capacity(head.len() + self.body.len());
        buf.put_slice(head.as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    fn check_mandatory(&self) -> Result<()> {
        for name in [
            HeaderName::Via,
            HeaderName::From,
            HeaderName::To,
            HeaderName::CallId,
            HeaderName::CSeq,
        ] {
            if !self.headers.contains(name) {
                return Err(Error::MissingMandatoryHeader(name));
            }
        }
        Ok(())
    }
}

macro_rules! first_of {
    ($self:ident, $name:ident) => {
        match $self.core().headers.get(HeaderName::$name) {
            Some(TypedHeader::$name(value)) => Some(value),
            _ => None,
        }
    };
}

macro_rules! first_of_mut {
    ($self:ident, $name:ident) => {
        match $self.core_mut().headers.get_mut(HeaderName::$name) {
            Some(TypedHeader::$name(value)) => Some(value),
            _ => None,
        }
    };
}

/// Typed header access shared by [`Request`] and [`Response`]
pub trait HeaderAccess {
    fn core(&self) -> &MessageCore;
    fn core_mut(&mut self) -> &mut MessageCore;

    /// Structural validation run after parsing and before sending
    fn check_headers(&self) -> Result<()>;

    /// Serialized wire form
    fn to_bytes(&self) -> Bytes;

    fn headers(&self) -> &Headers {
        &self.core().headers
    }

    fn header(&self, name: HeaderName) -> Option<&TypedHeader> {
        self.core().headers.get(name)
    }

    fn has_header(&self, name: HeaderName) -> bool {
        self.core().headers.contains(name)
    }

    /// Overwrites all values of the header's name
    fn set_header(&mut self, header: TypedHeader) {
        self.core_mut().headers.set(header);
    }

    /// Appends, failing on a second value for a singular header
    fn append_header(&mut self, header: TypedHeader) -> Result<()> {
        self.core_mut().headers.append(header)
    }

    fn remove_header(&mut self, name: HeaderName) -> Vec<TypedHeader> {
        self.core_mut().headers.remove(name)
    }

    /// Top-most Via
    fn via(&self) -> Option<&Via> {
        first_of!(self, Via)
    }

    fn via_mut(&mut self) -> Option<&mut Via> {
        first_of_mut!(self, Via)
    }

    fn vias(&self) -> Vec<&Via> {
        self.core()
            .headers
            .get_all(HeaderName::Via)
            .iter()
            .filter_map(|h| match h {
                TypedHeader::Via(via) => Some(via),
                _ => None,
            })
            .collect()
    }

    fn from(&self) -> Option<&Address> {
        first_of!(self, From)
    }

    fn from_mut(&mut self) -> Option<&mut Address> {
        first_of_mut!(self, From)
    }

    fn to(&self) -> Option<&Address> {
        first_of!(self, To)
    }

    fn to_mut(&mut self) -> Option<&mut Address> {
        first_of_mut!(self, To)
    }

    fn call_id(&self) -> Option<&str> {
        first_of!(self, CallId).map(String::as_str)
    }

    fn cseq(&self) -> Option<&CSeq> {
        first_of!(self, CSeq)
    }

    fn cseq_mut(&mut self) -> Option<&mut CSeq> {
        first_of_mut!(self, CSeq)
    }

    /// First address of the first Contact header
    fn contact(&self) -> Option<&Address> {
        first_of!(self, Contact).and_then(|list| list.first())
    }

    fn contacts(&self) -> Vec<&Address> {
        addresses(self.core(), HeaderName::Contact)
    }

    fn routes(&self) -> Vec<&Address> {
        addresses(self.core(), HeaderName::Route)
    }

    fn record_routes(&self) -> Vec<&Address> {
        addresses(self.core(), HeaderName::RecordRoute)
    }

    fn max_forwards(&self) -> Option<u32> {
        first_of!(self, MaxForwards).copied()
    }

    fn expires(&self) -> Option<u32> {
        first_of!(self, Expires).copied()
    }

    fn user_agent(&self) -> Option<&str> {
        first_of!(self, UserAgent).map(String::as_str)
    }

    fn content_type(&self) -> Option<&str> {
        first_of!(self, ContentType).map(String::as_str)
    }

    fn content_length(&self) -> Option<usize> {
        first_of!(self, ContentLength).copied()
    }

    fn event(&self) -> Option<&Event> {
        first_of!(self, Event)
    }

    fn subscription_state(&self) -> Option<&SubscriptionState> {
        first_of!(self, SubscriptionState)
    }

    fn www_authenticate(&self) -> Option<&Auth> {
        first_of!(self, WwwAuthenticate)
    }

    fn authorization(&self) -> Option<&Auth> {
        first_of!(self, Authorization)
    }

    fn body(&self) -> &Bytes {
        &self.core().body
    }

    /// Attaches a body with its Content-Type and recomputes Content-Length
    fn set_content(&mut self, content_type: impl Into<String>, body: impl Into<Bytes>)
    where
        Self: Sized,
    {
        let body = body.into();
        let core = self.core_mut();
        core.headers.set(TypedHeader::ContentType(content_type.into()));
        core.headers.set(TypedHeader::ContentLength(body.len()));
        core.body = body;
    }

    /// Drops the body, Content-Type and Content-Length
    fn clear_content(&mut self) {
        let core = self.core_mut();
        core.headers.remove(HeaderName::ContentType);
        core.headers.set(TypedHeader::ContentLength(0));
        core.body = Bytes::new();
    }

    fn set_expires(&mut self, expires: u32) {
        self.set_header(TypedHeader::Expires(expires));
    }

    fn set_max_forwards(&mut self, hops: u32) {
        self.set_header(TypedHeader::MaxForwards(hops));
    }

    fn set_user_agent(&mut self, user_agent: impl Into<String>)
    where
        Self: Sized,
    {
        self.set_header(TypedHeader::UserAgent(user_agent.into()));
    }

    fn source(&self) -> Option<SocketAddr> {
        self.core().source
    }

    fn destination(&self) -> Option<SocketAddr> {
        self.core().destination
    }

    /// Records where the message came from and where it arrived
    fn set_addresses(&mut self, source: SocketAddr, destination: SocketAddr) {
        let core = self.core_mut();
        core.source = Some(source);
        core.destination = Some(destination);
    }
}

fn addresses(core: &MessageCore, name: HeaderName) -> Vec<&Address> {
    core.headers
        .get_all(name)
        .iter()
        .flat_map(|h| match h {
            TypedHeader::Contact(list) | TypedHeader::Route(list) | TypedHeader::RecordRoute(list) => {
                list.as_slice()
            }
            _ => &[][..],
        })
        .collect()
}

impl HeaderAccess for Request {
    fn core(&self) -> &MessageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut MessageCore {
        &mut self.core
    }

    fn check_headers(&self) -> Result<()> {
        self.core.check_mandatory()?;
        if let Some(cseq) = self.cseq() {
            if cseq.method != self.method {
                return Err(Error::CSeqMethodMismatch {
                    request: self.method.to_string(),
                    cseq: cseq.method.to_string(),
                });
            }
        }
        match self.method {
            Method::Subscribe if self.event().is_none() => {
                Err(Error::MissingMandatoryHeader(HeaderName::Event))
            }
            Method::Notify if self.subscription_state().is_none() => {
                Err(Error::MissingMandatoryHeader(HeaderName::SubscriptionState))
            }
            _ => Ok(()),
        }
    }

    fn to_bytes(&self) -> Bytes {
        self.core.encode(&self.start_line())
    }
}

impl HeaderAccess for Response {
    fn core(&self) -> &MessageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut MessageCore {
        &mut self.core
    }

    fn check_headers(&self) -> Result<()> {
        self.core.check_mandatory()?;
        if !self.status.is_success() {
            return Ok(());
        }
        let Some(cseq) = self.cseq() else {
            return Ok(());
        };
        if cseq.method.is_dialog_forming() && self.contact().is_none() {
            return Err(Error::MissingMandatoryHeader(HeaderName::Contact));
        }
        if cseq.method == Method::Subscribe && self.expires().is_none() {
            return Err(Error::MissingMandatoryHeader(HeaderName::Expires));
        }
        Ok(())
    }

    fn to_bytes(&self) -> Bytes {
        self.core.encode(&self.start_line())
    }
}

/// A parsed message of either kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn as_access(&self) -> &dyn HeaderAccess {
        match self {
            Message::Request(req) => req,
            Message::Response(resp) => resp,
        }
    }

    pub fn as_access_mut(&mut self) -> &mut dyn HeaderAccess {
        match self {
            Message::Request(req) => req,
            Message::Response(resp) => resp,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        self.as_access().to_bytes()
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}
