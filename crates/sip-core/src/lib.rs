//! # sipstack-sip-core
//!
//! Message model and wire parser for the sipstack SIP engine.
//!
//! - [`types`]: URIs, addresses, Via, the header registry and the
//!   [`Request`]/[`Response`] pair with typed header access through
//!   [`HeaderAccess`].
//! - [`parser`]: turns a byte buffer into a validated [`Message`].
//! - [`auth`]: MD5 digest challenge, credentials and verification.
//! - [`util`]: random tags, Call-IDs and branches.
//!
//! ```text
//! let msg = sipstack_sip_core::parse_message(bytes)?;
//! let wire = msg.to_bytes();
//! ```

pub mod auth;
pub mod error;
pub mod parser;
pub mod types;
pub mod util;

pub use error::{Error, Result};
pub use parser::parse_message;
pub use types::{
    Address, Auth, AuthParam, CSeq, Event, HeaderAccess, HeaderName, Headers, Message,
    MessageCore, Method, Param, Params, Request, Response, Scheme, SipUri, StatusCode,
    SubscriptionState, TypedHeader, Via, BRANCH_MAGIC_COOKIE, SIP_VERSION,
};

/// Everything needed to build, parse and inspect messages
pub mod prelude {
    pub use crate::auth::{
        calculate_digest_response, generate_challenge, generate_credentials,
        verify_plain_text_password,
    };
    pub use crate::error::{Error, Result};
    pub use crate::parser::parse_message;
    pub use crate::types::*;
    pub use crate::util::{generate_branch, generate_call_id, generate_tag};
}
