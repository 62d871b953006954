//! Structured values for the headers the transaction and dialog layers read.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::method::Method;
use crate::types::param::Params;

/// `CSeq: 4711 INVITE`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

/// `Event: Catalog;id=2`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub id: Option<String>,
    /// Any parameters besides `id`
    pub params: Params,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Event {
            event_type: event_type.into(),
            id: None,
            params: Params::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.event_type)?;
        if let Some(id) = &self.id {
            write!(f, ";id={}", id)?;
        }
        write!(f, "{}", self.params)
    }
}

/// `Subscription-State: active;expires=3600`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionState {
    /// `active`, `pending` or `terminated`
    pub state: String,
    pub reason: Option<String>,
    pub expires: Option<u32>,
    pub retry_after: Option<u32>,
}

impl SubscriptionState {
    pub fn new(state: impl Into<String>) -> Self {
        SubscriptionState {
            state: state.into(),
            reason: None,
            expires: None,
            retry_after: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state.eq_ignore_ascii_case("terminated")
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.state)?;
        if let Some(reason) = &self.reason {
            write!(f, ";reason={}", reason)?;
        }
        if let Some(expires) = self.expires {
            write!(f, ";expires={}", expires)?;
        }
        if let Some(retry_after) = self.retry_after {
            write!(f, ";retry-after={}", retry_after)?;
        }
        Ok(())
    }
}

/// One `name=value` pair of a digest challenge or credentials header
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthParam {
    pub name: String,
    pub value: String,
    pub quoted: bool,
}

/// WWW-Authenticate, Authorization, Proxy-Authenticate and Proxy-Authorization values:
/// `Digest realm="3402000000", nonce="9bd055", algorithm=MD5`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Auth {
    pub scheme: String,
    pub params: Vec<AuthParam>,
}

impl Auth {
    pub fn digest() -> Self {
        Auth {
            scheme: "Digest".to_string(),
            params: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_str())
    }

    /// Inserts or replaces a parameter. `algorithm`, `stale` and `nc` are
    /// written as tokens, everything else as a quoted string.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let quoted = !matches!(
            name.to_ascii_lowercase().as_str(),
            "algorithm" | "stale" | "nc"
        );
        self.set_raw(name, value.into(), quoted);
    }

    pub(crate) fn set_raw(&mut self, name: String, value: String, quoted: bool) {
        match self
            .params
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&name))
        {
            Some(param) => {
                param.value = value;
                param.quoted = quoted;
            }
            None => self.params.push(AuthParam {
                name,
                value,
                quoted,
            }),
        }
    }

    pub fn realm(&self) -> Option<&str> {
        self.get("realm")
    }

    pub fn nonce(&self) -> Option<&str> {
        self.get("nonce")
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.get("algorithm")
    }

    pub fn qop(&self) -> Option<&str> {
        self.get("qop")
    }
}

impl fmt::Display for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scheme)?;
        for (i, param) in self.params.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            if param.quoted {
                write!(f, "{}=\"{}\"", param.name, param.value)?;
            } else {
                write!(f, "{}={}", param.name, param.value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        assert_eq!(Event::new("Catalog").with_id("2").to_string(), "Catalog;id=2");
        assert_eq!(Event::new("presence").to_string(), "presence");
    }

    #[test]
    fn test_subscription_state_display() {
        let mut state = SubscriptionState::new("terminated");
        state.reason = Some("timeout".to_string());
        assert!(state.is_terminated());
        assert_eq!(state.to_string(), "terminated;reason=timeout");

        let mut state = SubscriptionState::new("active");
        state.expires = Some(3600);
        assert_eq!(state.to_string(), "active;expires=3600");
    }

    #[test]
    fn test_auth_quoting() {
        let mut auth = Auth::digest();
        auth.set("realm", "3402000000");
        auth.set("nonce", "9bd055");
        auth.set("algorithm", "MD5");
        assert_eq!(
            auth.to_string(),
            "Digest realm=\"3402000000\", nonce=\"9bd055\", algorithm=MD5"
        );
        auth.set("nonce", "abc");
        assert_eq!(auth.nonce(), Some("abc"));
        assert_eq!(auth.params.len(), 3);
    }
}
