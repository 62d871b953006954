//! Whole-message parser: start line, header block, body, validation.

use bytes::Bytes;
use tracing::trace;

use crate::error::{Error, Result};
use crate::parser::headers::parse_header;
use crate::parser::start_line::{is_status_line, parse_request_line, parse_status_line};
use crate::types::headers::HeaderName;
use crate::types::message::{HeaderAccess, Message, MessageCore};
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;

/// Returns `(header_block_end, body_start)`, accepting CRLF or bare LF line endings
fn split_head(data: &[u8]) -> (usize, usize) {
    if let Some(pos) = find(data, b"\r\n\r\n") {
        return (pos, pos + 4);
    }
    if let Some(pos) = find(data, b"\n\n") {
        return (pos, pos + 2);
    }
    (data.len(), data.len())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn malformed(line: &str, reason: impl Into<String>) -> Error {
    Error::MalformedMessage {
        line: line.to_string(),
        reason: reason.into(),
    }
}

/// Joins folded continuation lines onto the header they continue
fn unfold<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            match out.last_mut() {
                Some(previous) => {
                    previous.push(' ');
                    previous.push_str(line.trim());
                }
                None => return Err(malformed(line, "continuation line without a header")),
            }
        } else {
            out.push(line.to_string());
        }
    }
    Ok(out)
}

/// Parses one SIP message from a buffer.
///
/// The first line decides request versus response. Each following line is
/// split on its first colon and dispatched to the header registry; unknown
/// names fail the parse. A non-zero Content-Length takes exactly that many
/// bytes after the blank line as the body. The finished message must pass
/// [`HeaderAccess::check_headers`].
pub fn parse_message(data: &[u8]) -> Result<Message> {
    let (head_end, body_start) = split_head(data);
    let head = std::str::from_utf8(&data[..head_end])
        .map_err(|_| malformed("", "header block is not valid UTF-8"))?;

    let mut lines = head
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .skip_while(|l| l.trim().is_empty());
    let start = lines
        .next()
        .ok_or_else(|| Error::MalformedStartLine("empty message".to_string()))?;
    trace!(start_line = %start, "parsing SIP message");

    let mut core = MessageCore::default();
    for line in unfold(lines)? {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(&line, "missing ':' separator"))?;
        let name: HeaderName = name.trim().parse()?;
        for header in parse_header(name, value)? {
            core.headers.append(header)?;
        }
    }

    if let Some(declared) = core.headers.get(HeaderName::ContentLength).and_then(|h| match h {
        crate::types::TypedHeader::ContentLength(len) => Some(*len),
        _ => None,
    }) {
        if declared > 0 {
            let available = data.len().saturating_sub(body_start);
            if declared > available {
                return Err(Error::TruncatedBody {
                    declared,
                    available,
                });
            }
            core.body = Bytes::copy_from_slice(&data[body_start..body_start + declared]);
        }
    }

    let message = if is_status_line(start) {
        let (version, status, reason) = parse_status_line(start)?;
        Message::Response(Response {
            version,
            status,
            reason,
            core,
        })
    } else {
        let (method, uri, version) = parse_request_line(start)?;
        Message::Request(Request {
            method,
            uri,
            version,
            core,
        })
    };

    message.as_access().check_headers()?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Method, StatusCode};

    const REGISTER: &str = "REGISTER sip:34020000002000000001@3402000000 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.168.1.64:5060;rport;branch=z9hG4bK-3139\r\n\
From: <sip:34020000001320000001@3402000000>;tag=1573749917\r\n\
To: <sip:34020000001320000001@3402000000>\r\n\
Call-ID: 1893542466\r\n\
CSeq: 1 REGISTER\r\n\
Contact: <sip:34020000001320000001@192.168.1.64:5060>\r\n\
Max-Forwards: 70\r\n\
User-Agent: IP Camera\r\n\
Expires: 3600\r\n\
Content-Length: 0\r\n\r\n";

    #[test]
    fn test_parse_register() {
        let msg = parse_message(REGISTER.as_bytes()).unwrap();
        let Message::Request(req) = msg else {
            panic!("expected a request");
        };
        assert_eq!(req.method, Method::Register);
        assert_eq!(req.call_id(), Some("1893542466"));
        assert_eq!(req.cseq().unwrap().seq, 1);
        assert_eq!(req.expires(), Some(3600));
        assert_eq!(req.user_agent(), Some("IP Camera"));
        assert_eq!(req.from().unwrap().tag(), "1573749917");
        assert!(req.body().is_empty());
    }

    #[test]
    fn test_unknown_header_is_rejected() {
        let raw = REGISTER.replace("User-Agent: IP Camera", "X-Vendor: acme");
        assert!(matches!(
            parse_message(raw.as_bytes()),
            Err(Error::UnknownHeader(name)) if name == "X-Vendor"
        ));
    }

    #[test]
    fn test_duplicate_singular_header_is_rejected() {
        let raw = REGISTER.replace("Call-ID: 1893542466\r\n", "Call-ID: 1\r\nCall-ID: 2\r\n");
        assert_eq!(
            parse_message(raw.as_bytes()),
            Err(Error::DuplicateHeader(HeaderName::CallId))
        );
    }

    #[test]
    fn test_missing_colon() {
        let raw = REGISTER.replace("Max-Forwards: 70", "Max-Forwards 70");
        assert!(matches!(
            parse_message(raw.as_bytes()),
            Err(Error::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_truncated_body() {
        let raw = REGISTER.replace("Content-Length: 0", "Content-Length: 20");
        let raw = format!("{}short", raw);
        assert_eq!(
            parse_message(raw.as_bytes()),
            Err(Error::TruncatedBody {
                declared: 20,
                available: 5
            })
        );
    }

    #[test]
    fn test_cseq_method_mismatch() {
        let raw = REGISTER.replace("CSeq: 1 REGISTER", "CSeq: 1 INVITE");
        assert!(matches!(
            parse_message(raw.as_bytes()),
            Err(Error::CSeqMethodMismatch { .. })
        ));
    }

    #[test]
    fn test_lf_only_line_endings() {
        let raw = REGISTER.replace("\r\n", "\n");
        let raw = raw.replace("Content-Length: 0", "Content-Length:  0");
        assert!(parse_message(raw.as_bytes()).unwrap().is_request());
    }

    #[test]
    fn test_folded_header() {
        let raw = REGISTER.replace("User-Agent: IP Camera", "User-Agent: IP\r\n Camera");
        let Message::Request(req) = parse_message(raw.as_bytes()).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(req.user_agent(), Some("IP Camera"));
    }

    #[test]
    fn test_response_needs_contact_on_invite_2xx() {
        let raw = "SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK-1\r\n\
From: <sip:a@10.0.0.1>;tag=1\r\n\
To: <sip:b@10.0.0.2>;tag=2\r\n\
Call-ID: c1\r\n\
CSeq: 1 INVITE\r\n\
Content-Length: 0\r\n\r\n";
        assert_eq!(
            parse_message(raw.as_bytes()),
            Err(Error::MissingMandatoryHeader(HeaderName::Contact))
        );
        let with_contact = raw.replace("CSeq: 1 INVITE\r\n", "CSeq: 1 INVITE\r\nContact: <sip:b@10.0.0.2>\r\n");
        let Message::Response(resp) = parse_message(with_contact.as_bytes()).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(resp.status, StatusCode::Ok);
    }
}
