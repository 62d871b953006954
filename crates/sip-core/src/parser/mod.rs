//! SIP wire parser.
//!
//! Token-level grammar (start lines, URIs, host/port, Via sent-protocol,
//! CSeq) is written with `nom`; header-level splitting respects quoted
//! strings and angle brackets.

pub mod address;
pub mod headers;
pub mod message;
pub mod start_line;
pub mod uri;
pub mod utils;

pub use address::{parse_address, parse_address_list};
pub use headers::parse_header;
pub use message::parse_message;
pub use uri::parse_uri;
pub use utils::is_token_char;
