use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::address::Address;
use crate::types::headers::header_name::HeaderName;
use crate::types::headers::values::{Auth, CSeq, Event, SubscriptionState};
use crate::types::via::Via;

/// A header value tagged with its kind.
///
/// Headers the engine interprets have structured variants; every other
/// registered header keeps its raw value in [`TypedHeader::Other`]. Build
/// raw headers with [`TypedHeader::from_raw`]; the header table re-parses an
/// `Other` that names a structured header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypedHeader {
    Via(Via),
    Route(Vec<Address>),
    RecordRoute(Vec<Address>),
    MaxForwards(u32),
    From(Address),
    To(Address),
    CallId(String),
    CSeq(CSeq),
    Contact(Vec<Address>),
    ContentType(String),
    ContentLength(usize),
    Expires(u32),
    UserAgent(String),
    Event(Event),
    SubscriptionState(SubscriptionState),
    WwwAuthenticate(Auth),
    Authorization(Auth),
    ProxyAuthenticate(Auth),
    ProxyAuthorization(Auth),
    Other(HeaderName, String),
}

impl TypedHeader {
    /// Header values from a name and its raw text.
    ///
    /// Structured names are parsed into their own variant, so a Via list
    /// yields one value per entry. Other names stay raw.
    pub fn from_raw(name: HeaderName, value: &str) -> Result<Vec<TypedHeader>> {
        crate::parser::headers::parse_header(name, value)
    }

    pub fn name(&self) -> HeaderName {
        match self {
            TypedHeader::Via(_) => HeaderName::Via,
            TypedHeader::Route(_) => HeaderName::Route,
            TypedHeader::RecordRoute(_) => HeaderName::RecordRoute,
            TypedHeader::MaxForwards(_) => HeaderName::MaxForwards,
            TypedHeader::From(_) => HeaderName::From,
            TypedHeader::To(_) => HeaderName::To,
            TypedHeader::CallId(_) => HeaderName::CallId,
            TypedHeader::CSeq(_) => HeaderName::CSeq,
            TypedHeader::Contact(_) => HeaderName::Contact,
            TypedHeader::ContentType(_) => HeaderName::ContentType,
            TypedHeader::ContentLength(_) => HeaderName::ContentLength,
            TypedHeader::Expires(_) => HeaderName::Expires,
            TypedHeader::UserAgent(_) => HeaderName::UserAgent,
            TypedHeader::Event(_) => HeaderName::Event,
            TypedHeader::SubscriptionState(_) => HeaderName::SubscriptionState,
            TypedHeader::WwwAuthenticate(_) => HeaderName::WwwAuthenticate,
            TypedHeader::Authorization(_) => HeaderName::Authorization,
            TypedHeader::ProxyAuthenticate(_) => HeaderName::ProxyAuthenticate,
            TypedHeader::ProxyAuthorization(_) => HeaderName::ProxyAuthorization,
            TypedHeader::Other(name, _) => *name,
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, addresses: &[Address]) -> fmt::Result {
    for (i, addr) in addresses.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", addr)?;
    }
    Ok(())
}

/// Writes the header value only, without `Name: `
impl fmt::Display for TypedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedHeader::Via(via) => write!(f, "{}", via),
            TypedHeader::Route(list) | TypedHeader::RecordRoute(list) | TypedHeader::Contact(list) => {
                write_list(f, list)
            }
            TypedHeader::MaxForwards(n) | TypedHeader::Expires(n) => write!(f, "{}", n),
            TypedHeader::From(addr) | TypedHeader::To(addr) => write!(f, "{}", addr),
            TypedHeader::CSeq(cseq) => write!(f, "{}", cseq),
            TypedHeader::ContentLength(len) => write!(f, "{}", len),
            TypedHeader::CallId(s) | TypedHeader::ContentType(s) | TypedHeader::UserAgent(s) => {
                f.write_str(s)
            }
            TypedHeader::Event(event) => write!(f, "{}", event),
            TypedHeader::SubscriptionState(state) => write!(f, "{}", state),
            TypedHeader::WwwAuthenticate(auth)
            | TypedHeader::Authorization(auth)
            | TypedHeader::ProxyAuthenticate(auth)
            | TypedHeader::ProxyAuthorization(auth) => write!(f, "{}", auth),
            TypedHeader::Other(_, value) => f.write_str(value),
        }
    }
}
