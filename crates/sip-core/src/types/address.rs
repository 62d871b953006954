use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::Params;
use crate::types::uri::SipUri;

/// A name-addr: optional display name, a URI and header parameters.
///
/// This is the value carried by From, To, Contact, Route and Record-Route.
/// Parameters written after the closing `>` belong to the header (`tag`,
/// `expires`, `q`), not to the URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub display_name: Option<String>,
    pub uri: SipUri,
    pub params: Params,
}

impl Address {
    pub fn new(uri: SipUri) -> Self {
        Address {
            display_name: None,
            uri,
            params: Params::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_tag(tag);
        self
    }

    /// The `tag` parameter; empty when absent
    pub fn tag(&self) -> &str {
        self.params.value("tag").unwrap_or("")
    }

    /// Sets the tag; an empty tag removes the parameter
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if tag.is_empty() {
            self.params.remove("tag");
        } else {
            self.params.set("tag", Some(tag));
        }
    }

    pub fn has_tag(&self) -> bool {
        !self.tag().is_empty()
    }

    /// Contact `expires` parameter
    pub fn expires(&self) -> Option<u32> {
        self.params.value("expires").and_then(|v| v.parse().ok())
    }

    /// Contact `q` parameter
    pub fn q(&self) -> Option<f32> {
        self.params.value("q").and_then(|v| v.parse().ok())
    }
}

impl From<SipUri> for Address {
    fn from(uri: SipUri) -> Self {
        Address::new(uri)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>{}", self.uri, self.params)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::parser::address::parse_address(s)
    }
}
