//! # SIP URIs
//!
//! `sip:` and `sips:` URIs as described in
//! [RFC 3261 Section 19.1](https://datatracker.ietf.org/doc/html/rfc3261#section-19.1):
//!
//! ```text
//! sip:user:password@host:port;uri-parameters?headers
//! ```
//!
//! A parsed [`SipUri`] is a plain value; mutate a clone when a derived URI is needed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::Params;

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Sip,
    Sips,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A SIP or SIPS URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SipUri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
    /// `?name=value&...` header components
    pub headers: Params,
}

impl SipUri {
    /// A `sip:` URI with no user part
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        SipUri {
            scheme: Scheme::Sip,
            user: None,
            password: None,
            host: host.into(),
            port,
            params: Params::new(),
            headers: Params::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.params.set(name, value);
        self
    }

    /// `host[:port]`
    pub fn host_port(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The `transport` URI parameter, if any
    pub fn transport(&self) -> Option<&str> {
        self.params.value("transport")
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.params)?;
        let mut separator = '?';
        for header in self.headers.iter() {
            write!(f, "{}{}", separator, header)?;
            separator = '&';
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::parser::uri::parse_uri(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_full_uri() {
        let mut uri = SipUri::new("192.168.1.100", Some(5060)).with_user("34020000002000000001");
        uri.password = Some("secret".to_string());
        uri.params.set("transport", Some("tcp".to_string()));
        uri.headers.set("subject", Some("hi".to_string()));
        uri.headers.set("priority", Some("urgent".to_string()));
        assert_eq!(
            uri.to_string(),
            "sip:34020000002000000001:secret@192.168.1.100:5060;transport=tcp?subject=hi&priority=urgent"
        );
        assert_eq!(uri.transport(), Some("tcp"));
    }

    #[test]
    fn test_host_port() {
        assert_eq!(SipUri::new("example.com", None).host_port(), "example.com");
        assert_eq!(SipUri::new("10.0.0.1", Some(5070)).host_port(), "10.0.0.1:5070");
    }
}
