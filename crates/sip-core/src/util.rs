//! Random identifiers for tags, Call-IDs and branches.

use rand::RngCore;

use crate::types::via::BRANCH_MAGIC_COOKIE;

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// From/To tag: 12 random bytes as lowercase hex
pub fn generate_tag() -> String {
    random_hex(12)
}

/// Call-ID: 24 random bytes as lowercase hex
pub fn generate_call_id() -> String {
    random_hex(24)
}

/// Via branch carrying the RFC 3261 magic cookie
pub fn generate_branch() -> String {
    format!("{}-{}", BRANCH_MAGIC_COOKIE, random_hex(24))
}
