//! # SIP Transaction Layer
//!
//! The four RFC 3261 §17 state machines:
//!
//! ```text
//! Client INVITE       Calling -> Proceeding -> Completed -> Terminated
//! Client non-INVITE   Trying  -> Proceeding -> Completed -> Terminated
//! Server INVITE       Proceeding -> Completed -> Confirmed -> Terminated
//! Server non-INVITE   Trying  -> Proceeding -> Completed -> Terminated
//! ```
//!
//! Every transaction serializes its transitions behind one async mutex, so
//! timer firings, inbound messages and application calls never interleave
//! inside a transition. Reaching Terminated always removes the transaction
//! from the stack registry first.
//!
//! Transactions are keyed by the top Via branch. CANCEL gets
//! `branch:CANCEL` so it never collides with the INVITE it cancels.

pub mod client;
pub mod server;
pub mod timer;

use std::fmt;

use sipstack_sip_core::{HeaderAccess, Method};

pub use client::ClientTransaction;
pub use server::ServerTransaction;
pub use timer::TimerSettings;

/// Registry key of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey(String);

impl TransactionKey {
    pub fn new(branch: &str, method: &Method) -> Self {
        match method {
            Method::Cancel => TransactionKey(format!("{}:CANCEL", branch)),
            _ => TransactionKey(branch.to_string()),
        }
    }

    /// Key of a request or response, from its top Via branch and CSeq method
    pub fn from_message(message: &impl HeaderAccess) -> Option<Self> {
        let branch = message.via()?.branch()?;
        let method = &message.cseq()?.method;
        Some(TransactionKey::new(branch, method))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of any of the four machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Created but nothing sent or received yet
    Initial,
    Calling,
    Trying,
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Initial => "Initial",
            TransactionState::Calling => "Calling",
            TransactionState::Trying => "Trying",
            TransactionState::Proceeding => "Proceeding",
            TransactionState::Completed => "Completed",
            TransactionState::Confirmed => "Confirmed",
            TransactionState::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipstack_sip_core::Request;

    #[test]
    fn test_cancel_key_is_distinct() {
        assert_eq!(TransactionKey::new("z9hG4bK-1", &Method::Invite).as_str(), "z9hG4bK-1");
        assert_eq!(
            TransactionKey::new("z9hG4bK-1", &Method::Cancel).as_str(),
            "z9hG4bK-1:CANCEL"
        );
    }

    #[test]
    fn test_key_from_message() {
        let raw = "CANCEL sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK-77\r\n\
From: <sip:alice@example.com>;tag=a\r\n\
To: <sip:bob@example.com>\r\n\
Call-ID: c1\r\n\
CSeq: 1 CANCEL\r\n\
Content-Length: 0\r\n\r\n";
        let request = Request::parse(raw.as_bytes()).unwrap();
        let key = TransactionKey::from_message(&request).unwrap();
        assert_eq!(key.to_string(), "z9hG4bK-77:CANCEL");
    }
}
