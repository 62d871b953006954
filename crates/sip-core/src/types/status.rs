//! # SIP Status Codes
//!
//! Response status codes as listed in
//! [RFC 3261 Section 21](https://datatracker.ietf.org/doc/html/rfc3261#section-21)
//! and RFC 6665 (489 Bad Event).
//!
//! - `1xx`: Provisional
//! - `2xx`: Success
//! - `3xx`: Redirection
//! - `4xx`: Client Error
//! - `5xx`: Server Error
//! - `6xx`: Global Failure
//!
//! Codes that have no named variant are carried as [`StatusCode::Custom`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

macro_rules! status_codes {
    ($( $(#[$doc:meta])* $variant:ident = $code:literal, $reason:literal; )+) => {
        /// SIP status codes as defined in RFC 3261 and extensions
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum StatusCode {
            $( $(#[$doc])* $variant, )+
            /// Any other code in 100..=699
            Custom(u16),
        }

        impl StatusCode {
            /// Creates a status code from a raw value.
            ///
            /// Returns [`Error::InvalidStatusCode`] outside 100..=699.
            pub fn from_u16(code: u16) -> Result<Self> {
                match code {
                    $( $code => Ok(StatusCode::$variant), )+
                    100..=699 => Ok(StatusCode::Custom(code)),
                    _ => Err(Error::InvalidStatusCode(code)),
                }
            }

            pub fn as_u16(&self) -> u16 {
                match self {
                    $( StatusCode::$variant => $code, )+
                    StatusCode::Custom(code) => *code,
                }
            }

            /// Canonical reason phrase, `"Unknown Status"` for custom codes
            pub fn reason_phrase(&self) -> &'static str {
                match self {
                    $( StatusCode::$variant => $reason, )+
                    StatusCode::Custom(_) => "Unknown Status",
                }
            }
        }
    };
}

status_codes! {
    Trying = 100, "Trying";
    Ringing = 180, "Ringing";
    CallIsBeingForwarded = 181, "Call Is Being Forwarded";
    Queued = 182, "Queued";
    SessionProgress = 183, "Session Progress";

    Ok = 200, "OK";
    Accepted = 202, "Accepted";

    MultipleChoices = 300, "Multiple Choices";
    MovedPermanently = 301, "Moved Permanently";
    MovedTemporarily = 302, "Moved Temporarily";
    UseProxy = 305, "Use Proxy";
    AlternativeService = 380, "Alternative Service";

    BadRequest = 400, "Bad Request";
    Unauthorized = 401, "Unauthorized";
    PaymentRequired = 402, "Payment Required";
    Forbidden = 403, "Forbidden";
    NotFound = 404, "Not Found";
    MethodNotAllowed = 405, "Method Not Allowed";
    NotAcceptable = 406, "Not Acceptable";
    ProxyAuthenticationRequired = 407, "Proxy Authentication Required";
    RequestTimeout = 408, "Request Timeout";
    Gone = 410, "Gone";
    RequestEntityTooLarge = 413, "Request Entity Too Large";
    RequestUriTooLong = 414, "Request-URI Too Long";
    UnsupportedMediaType = 415, "Unsupported Media Type";
    UnsupportedUriScheme = 416, "Unsupported URI Scheme";
    BadExtension = 420, "Bad Extension";
    ExtensionRequired = 421, "Extension Required";
    IntervalTooBrief = 423, "Interval Too Brief";
    TemporarilyUnavailable = 480, "Temporarily Unavailable";
    /// 481, answered to in-dialog requests that match no dialog
    CallOrTransactionDoesNotExist = 481, "Call/Transaction Does Not Exist";
    LoopDetected = 482, "Loop Detected";
    TooManyHops = 483, "Too Many Hops";
    AddressIncomplete = 484, "Address Incomplete";
    Ambiguous = 485, "Ambiguous";
    BusyHere = 486, "Busy Here";
    RequestTerminated = 487, "Request Terminated";
    NotAcceptableHere = 488, "Not Acceptable Here";
    BadEvent = 489, "Bad Event";
    RequestPending = 491, "Request Pending";
    Undecipherable = 493, "Undecipherable";

    ServerInternalError = 500, "Server Internal Error";
    NotImplemented = 501, "Not Implemented";
    BadGateway = 502, "Bad Gateway";
    ServiceUnavailable = 503, "Service Unavailable";
    ServerTimeout = 504, "Server Time-out";
    VersionNotSupported = 505, "Version Not Supported";
    MessageTooLarge = 513, "Message Too Large";

    BusyEverywhere = 600, "Busy Everywhere";
    Decline = 603, "Decline";
    DoesNotExistAnywhere = 604, "Does Not Exist Anywhere";
    NotAcceptable606 = 606, "Not Acceptable";
}

impl StatusCode {
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.as_u16())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    pub fn is_final(&self) -> bool {
        self.as_u16() >= 200
    }

    /// Any 4xx, 5xx or 6xx
    pub fn is_error(&self) -> bool {
        self.as_u16() >= 400
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        StatusCode::from_u16(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

impl FromStr for StatusCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::Parser(format!("invalid status code: {}", s)))?;
        StatusCode::from_u16(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(StatusCode::from_u16(200).unwrap(), StatusCode::Ok);
        assert_eq!(StatusCode::from_u16(481).unwrap().reason_phrase(), "Call/Transaction Does Not Exist");
        assert_eq!(StatusCode::BadEvent.as_u16(), 489);
        assert_eq!(StatusCode::Unauthorized.to_string(), "401 Unauthorized");
    }

    #[test]
    fn test_custom_and_invalid_codes() {
        let custom = StatusCode::from_u16(499).unwrap();
        assert_eq!(custom, StatusCode::Custom(499));
        assert_eq!(custom.reason_phrase(), "Unknown Status");
        assert!(StatusCode::from_u16(99).is_err());
        assert!(StatusCode::from_u16(700).is_err());
        assert_eq!("486".parse::<StatusCode>().unwrap(), StatusCode::BusyHere);
    }

    #[test]
    fn test_classes() {
        assert!(StatusCode::Ringing.is_provisional());
        assert!(StatusCode::Accepted.is_success());
        assert!(StatusCode::Decline.is_error());
        assert!(!StatusCode::Trying.is_final());
    }
}
