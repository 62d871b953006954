//! Reassembly of SIP messages from a byte stream.
//!
//! A stream read may hold part of a message or several coalesced ones. The
//! framer buffers bytes until it sees the blank line ending a header block,
//! reads Content-Length (or its compact form `l`) from that block, and cuts
//! the message once the body is complete.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Largest unterminated header block accepted before the stream is dropped
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Largest complete message (headers plus declared body) accepted on a stream
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: BytesMut,
}

impl StreamFramer {
    pub fn new() -> Self {
        StreamFramer::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes held that do not yet form a complete message
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Cuts the next complete message, or returns `None` until more bytes arrive
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        // CRLF keep-alives between messages
        let pad = self
            .buf
            .iter()
            .take_while(|b| **b == b'\r' || **b == b'\n')
            .count();
        self.buf.advance(pad);
        if self.buf.is_empty() {
            return Ok(None);
        }

        let Some((head_end, body_start)) = find_header_end(&self.buf) else {
            if self.buf.len() > MAX_HEADER_SIZE {
                return Err(Error::FrameTooLarge {
                    limit: MAX_HEADER_SIZE,
                });
            }
            return Ok(None);
        };

        let total = body_start
            .checked_add(content_length(&self.buf[..head_end]))
            .filter(|total| *total <= MAX_MESSAGE_SIZE)
            .ok_or(Error::FrameTooLarge {
                limit: MAX_MESSAGE_SIZE,
            })?;
        if self.buf.len() < total {
            return Ok(None);
        }
        Ok(Some(self.buf.split_to(total).freeze()))
    }
}

fn position(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `(end of header block, start of body)` for the earliest terminator
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = position(buf, b"\r\n\r\n").map(|p| (p, p + 4));
    let lf = position(buf, b"\n\n").map(|p| (p, p + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn content_length(head: &[u8]) -> usize {
    head.split(|b| *b == b'\n')
        .filter_map(|line| {
            let line = std::str::from_utf8(line).ok()?;
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .next()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSG: &[u8] = b"MESSAGE sip:a@b SIP/2.0\r\nContent-Length: 5\r\n\r\nhello";

    #[test]
    fn test_split_message_is_joined() {
        let mut framer = StreamFramer::new();
        framer.push(&MSG[..20]);
        assert_eq!(framer.next_frame().unwrap(), None);
        framer.push(&MSG[20..MSG.len() - 2]);
        assert_eq!(framer.next_frame().unwrap(), None);
        framer.push(&MSG[MSG.len() - 2..]);
        assert_eq!(framer.next_frame().unwrap().as_deref(), Some(MSG));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_coalesced_messages_are_split() {
        let mut framer = StreamFramer::new();
        let mut data = MSG.to_vec();
        data.extend_from_slice(b"\r\n\r\n");
        data.extend_from_slice(b"OPTIONS sip:a@b SIP/2.0\nl: 0\n\n");
        framer.push(&data);
        assert_eq!(framer.next_frame().unwrap().as_deref(), Some(MSG));
        assert_eq!(
            framer.next_frame().unwrap().as_deref(),
            Some(&b"OPTIONS sip:a@b SIP/2.0\nl: 0\n\n"[..])
        );
        assert_eq!(framer.next_frame().unwrap(), None);
    }

    #[test]
    fn test_oversized_header_block() {
        let mut framer = StreamFramer::new();
        framer.push(&vec![b'a'; MAX_HEADER_SIZE + 1]);
        assert!(matches!(
            framer.next_frame(),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_declared_length_overflow() {
        let mut framer = StreamFramer::new();
        framer.push(b"OPTIONS sip:a@b SIP/2.0\r\nContent-Length: 18446744073709551615\r\n\r\n");
        assert!(matches!(
            framer.next_frame(),
            Err(Error::FrameTooLarge { limit: MAX_MESSAGE_SIZE })
        ));
    }

    #[test]
    fn test_declared_body_over_limit() {
        let mut framer = StreamFramer::new();
        framer.push(b"OPTIONS sip:a@b SIP/2.0\r\nContent-Length: 1000000000000\r\n\r\n");
        framer.push(&[b'x'; 4000]);
        assert!(matches!(
            framer.next_frame(),
            Err(Error::FrameTooLarge { limit: MAX_MESSAGE_SIZE })
        ));
    }

    #[test]
    fn test_body_at_limit_is_accepted() {
        let head = format!(
            "MESSAGE sip:a@b SIP/2.0\r\nContent-Length: {}\r\n\r\n",
            MAX_MESSAGE_SIZE - 100
        );
        let mut framer = StreamFramer::new();
        framer.push(head.as_bytes());
        assert_eq!(framer.next_frame().unwrap(), None);
        framer.push(&vec![b'x'; MAX_MESSAGE_SIZE - 100]);
        let frame = framer.next_frame().unwrap().unwrap();
        assert_eq!(frame.len(), head.len() + MAX_MESSAGE_SIZE - 100);
    }
}
