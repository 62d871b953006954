//! Core SIP data types: URIs, addresses, Via, headers and messages.

pub mod address;
pub mod headers;
pub mod message;
pub mod method;
pub mod param;
pub mod sip_request;
pub mod sip_response;
pub mod status;
pub mod uri;
pub mod via;

pub use address::Address;
pub use headers::{
    Auth, AuthParam, CSeq, Event, HeaderName, Headers, SubscriptionState, TypedHeader,
};
pub use message::{HeaderAccess, Message, MessageCore, SIP_VERSION};
pub use method::Method;
pub use param::{Param, Params};
pub use sip_request::Request;
pub use sip_response::Response;
pub use status::StatusCode;
pub use uri::{Scheme, SipUri};
pub use via::{Via, BRANCH_MAGIC_COOKIE};
