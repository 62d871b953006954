use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

macro_rules! header_names {
    (@compact $compact:literal) => { Some($compact) };
    (@compact) => { None };
    ($( $(#[$doc:meta])* $variant:ident => $name:literal $(| $compact:literal)?; )+) => {
        /// The closed registry of supported SIP header names.
        ///
        /// Declaration order is wire order: a message writes Via, Route,
        /// Record-Route, Proxy-Require, Max-Forwards, From, To, Call-ID and
        /// CSeq first, then the remaining headers, then Content-Length. The
        /// derived `Ord` follows that order so a sorted header table
        /// serializes correctly without further bookkeeping.
        ///
        /// Names outside the registry are rejected when parsing.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum HeaderName {
            $( $(#[$doc])* $variant, )+
        }

        impl HeaderName {
            /// Every registered header, in wire order
            pub const ALL: &'static [HeaderName] = &[$( HeaderName::$variant, )+];

            /// Canonical capitalization
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( HeaderName::$variant => $name, )+
                }
            }

            /// Single-letter compact form (RFC 3261 Section 7.3.3), if any
            pub fn compact_form(&self) -> Option<&'static str> {
                match self {
                    $( HeaderName::$variant => header_names!(@compact $($compact)?), )+
                }
            }

            fn lookup(name: &str) -> Option<HeaderName> {
                $(
                    if name.eq_ignore_ascii_case($name)
                        $(|| name.eq_ignore_ascii_case($compact))?
                    {
                        return Some(HeaderName::$variant);
                    }
                )+
                None
            }
        }
    };
}

header_names! {
    Via => "Via" | "v";
    Route => "Route";
    RecordRoute => "Record-Route";
    ProxyRequire => "Proxy-Require";
    MaxForwards => "Max-Forwards";
    From => "From" | "f";
    To => "To" | "t";
    CallId => "Call-ID" | "i";
    CSeq => "CSeq";
    Accept => "Accept";
    AcceptEncoding => "Accept-Encoding";
    AcceptLanguage => "Accept-Language";
    AlertInfo => "Alert-Info";
    Allow => "Allow";
    AllowEvents => "Allow-Events" | "u";
    AuthenticationInfo => "Authentication-Info";
    Authorization => "Authorization";
    CallInfo => "Call-Info";
    Contact => "Contact" | "m";
    ContentDisposition => "Content-Disposition";
    ContentEncoding => "Content-Encoding" | "e";
    ContentLanguage => "Content-Language";
    ContentType => "Content-Type" | "c";
    Date => "Date";
    ErrorInfo => "Error-Info";
    Event => "Event" | "o";
    Expires => "Expires";
    InReplyTo => "In-Reply-To";
    MimeVersion => "MIME-Version";
    MinExpires => "Min-Expires";
    Organization => "Organization";
    Priority => "Priority";
    ProxyAuthenticate => "Proxy-Authenticate";
    ProxyAuthorization => "Proxy-Authorization";
    ReplyTo => "Reply-To";
    Require => "Require";
    RetryAfter => "Retry-After";
    Server => "Server";
    Subject => "Subject" | "s";
    SubscriptionState => "Subscription-State";
    Supported => "Supported" | "k";
    Timestamp => "Timestamp";
    Unsupported => "Unsupported";
    UserAgent => "User-Agent";
    Warning => "Warning";
    WwwAuthenticate => "WWW-Authenticate";
    /// Always written last, just before the body
    ContentLength => "Content-Length" | "l";
}

impl HeaderName {
    /// Headers with their own [`TypedHeader`](crate::types::TypedHeader) variant
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            HeaderName::Via
                | HeaderName::Route
                | HeaderName::RecordRoute
                | HeaderName::MaxForwards
                | HeaderName::From
                | HeaderName::To
                | HeaderName::CallId
                | HeaderName::CSeq
                | HeaderName::Contact
                | HeaderName::ContentType
                | HeaderName::ContentLength
                | HeaderName::Expires
                | HeaderName::UserAgent
                | HeaderName::Event
                | HeaderName::SubscriptionState
                | HeaderName::WwwAuthenticate
                | HeaderName::Authorization
                | HeaderName::ProxyAuthenticate
                | HeaderName::ProxyAuthorization
        )
    }

    /// Headers that may appear at most once in a message
    pub fn is_singular(&self) -> bool {
        matches!(
            self,
            HeaderName::From
                | HeaderName::To
                | HeaderName::CallId
                | HeaderName::CSeq
                | HeaderName::MaxForwards
                | HeaderName::Expires
                | HeaderName::UserAgent
                | HeaderName::ContentType
                | HeaderName::ContentLength
        )
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    /// Case-insensitive, accepting compact forms
    fn from_str(s: &str) -> Result<Self> {
        HeaderName::lookup(s.trim()).ok_or_else(|| Error::UnknownHeader(s.trim().to_string()))
    }
}
