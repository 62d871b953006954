//! # Via header values
//!
//! ```text
//! Via: SIP/2.0/UDP 192.168.1.64:5060;rport;branch=z9hG4bK-3139
//! ```
//!
//! The branch correlates a request with its responses. `received` and
//! `rport` are filled in by the receiving side when the sent-by address
//! differs from the packet source (RFC 3581).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::Params;

/// Magic cookie prefix of RFC 3261 branch values
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// One Via header value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Via {
    /// Protocol name and version, normally `SIP/2.0`
    pub protocol: String,
    /// Upper-case transport token, e.g. `UDP`
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
}

impl Via {
    pub fn new(transport: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Via {
            protocol: "SIP/2.0".to_string(),
            transport: transport.into().to_ascii_uppercase(),
            host: host.into(),
            port,
            params: Params::new(),
        }
    }

    /// `host[:port]` as written in the header
    pub fn sent_by(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.set_branch(branch);
        self
    }

    pub fn branch(&self) -> Option<&str> {
        self.params.value("branch").filter(|b| !b.is_empty())
    }

    /// Sets the branch; an empty value clears it
    pub fn set_branch(&mut self, branch: impl Into<String>) {
        let branch = branch.into();
        if branch.is_empty() {
            self.params.remove("branch");
        } else {
            self.params.set("branch", Some(branch));
        }
    }

    pub fn received(&self) -> Option<&str> {
        self.params.value("received")
    }

    pub fn set_received(&mut self, host: impl Into<String>) {
        self.params.set("received", Some(host.into()));
    }

    /// `None` when absent, `Some(None)` for a bare `rport` flag
    pub fn rport(&self) -> Option<Option<u16>> {
        self.params
            .get("rport")
            .map(|value| value.and_then(|v| v.parse().ok()))
    }

    /// Sets `rport`; `None` writes the bare request flag
    pub fn set_rport(&mut self, port: Option<u16>) {
        self.params.set("rport", port.map(|p| p.to_string()));
    }

    pub fn maddr(&self) -> Option<&str> {
        self.params.value("maddr")
    }

    pub fn ttl(&self) -> Option<u8> {
        self.params.value("ttl").and_then(|v| v.parse().ok())
    }

    pub fn is_transport(&self, transport: &str) -> bool {
        self.transport.eq_ignore_ascii_case(transport)
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {}{}",
            self.protocol,
            self.transport,
            self.sent_by(),
            self.params
        )
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::parser::headers::parse_via(s)
    }
}
