//! HTTP Digest (RFC 2617, MD5) challenge and credential helpers.
//!
//! Only the `algorithm=MD5` variant without `qop` is computed. A challenge
//! that offers `qop="auth"` is still answered with the plain RFC 2069 form.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::headers::{Auth, TypedHeader};
use crate::types::message::HeaderAccess;
use crate::types::method::Method;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;

pub const DEFAULT_ALGORITHM: &str = "MD5";
pub const DEFAULT_SCHEME: &str = "Digest";

fn h(data: &str) -> String {
    format!("{:x}", md5::compute(data.as_bytes()))
}

/// `md5(md5(user:realm:pass) ":" nonce ":" md5(method:uri))` as lowercase hex
pub fn calculate_digest_response(
    username: &str,
    realm: &str,
    password: &str,
    method: &Method,
    uri: &str,
    nonce: &str,
) -> String {
    let ha1 = h(&format!("{}:{}:{}", username, realm, password));
    let ha2 = h(&format!("{}:{}", method, uri));
    h(&format!("{}:{}:{}", ha1, nonce, ha2))
}

fn generate_nonce() -> String {
    STANDARD.encode(rand::random::<[u8; 12]>())
}

/// Adds `WWW-Authenticate: Digest realm=.., nonce=.., algorithm=MD5` to a 401
pub fn generate_challenge(response: &mut Response, realm: &str) {
    let mut auth = Auth::digest();
    auth.set("realm", realm);
    auth.set("nonce", generate_nonce());
    auth.set("algorithm", DEFAULT_ALGORITHM);
    response.set_header(TypedHeader::WwwAuthenticate(auth));
}

/// Answers the challenge in `challenge` by setting an Authorization header
/// on `request`.
///
/// The username is the user part of the From URI, and the digest covers the
/// request method and request-URI.
pub fn generate_credentials(request: &mut Request, challenge: &Response, password: &str) -> Result<()> {
    let www = challenge
        .www_authenticate()
        .ok_or_else(|| Error::Authentication("response carries no WWW-Authenticate".to_string()))?;

    let realm = www
        .realm()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::Authentication("challenge has no realm".to_string()))?;
    let nonce = www
        .nonce()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::Authentication("challenge has no nonce".to_string()))?;

    if let Some(algorithm) = www.algorithm().filter(|a| !a.is_empty()) {
        if !algorithm.eq_ignore_ascii_case(DEFAULT_ALGORITHM) {
            return Err(Error::Authentication(format!(
                "unsupported digest algorithm {}",
                algorithm
            )));
        }
    }
    if let Some(qop) = www.qop().filter(|q| !q.is_empty()) {
        let supported = qop
            .split(',')
            .map(str::trim)
            .any(|q| q.eq_ignore_ascii_case("auth") || q.eq_ignore_ascii_case("auth-int"));
        if !supported {
            return Err(Error::Authentication(format!("unsupported qop {}", qop)));
        }
    }

    let username = request
        .from()
        .and_then(|from| from.uri.user.clone())
        .ok_or_else(|| Error::Authentication("From URI has no user part".to_string()))?;
    let uri = request.uri.to_string();
    let response = calculate_digest_response(
        &username,
        realm,
        password,
        &request.method,
        &uri,
        nonce,
    );

    let mut auth = Auth::digest();
    auth.set("username", username);
    auth.set("realm", realm);
    auth.set("nonce", nonce);
    auth.set("uri", uri);
    auth.set("response", response);
    auth.set("algorithm", DEFAULT_ALGORITHM);
    debug!(realm = %realm, "answering digest challenge");
    request.set_header(TypedHeader::Authorization(auth));
    Ok(())
}

/// Checks the request's Authorization digest against a plain-text password
pub fn verify_plain_text_password(request: &Request, password: &str) -> bool {
    let Some(auth) = request.authorization() else {
        return false;
    };
    let field = |name: &str| auth.get(name).filter(|v| !v.is_empty());
    let (Some(username), Some(realm), Some(nonce), Some(uri), Some(response)) = (
        field("username"),
        field("realm"),
        field("nonce"),
        field("uri"),
        field("response"),
    ) else {
        return false;
    };
    calculate_digest_response(username, realm, password, &request.method, uri, nonce) == response
}
