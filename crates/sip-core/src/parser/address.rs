//! name-addr / addr-spec parsing for From, To, Contact, Route and Record-Route.

use crate::error::{Error, Result};
use crate::parser::uri::parse_uri;
use crate::parser::utils::{split_outside_quotes, unquote};
use crate::types::address::Address;
use crate::types::param::Params;

/// Byte offset of the first `<` that is not inside a quoted display name
fn open_bracket(s: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Parses one address.
///
/// With angle brackets, text before `<` is the display name and parameters
/// after `>` belong to the header. Without them, everything after the first
/// `;` is a header parameter (RFC 3261 Section 20.10).
pub fn parse_address(input: &str) -> Result<Address> {
    let s = input.trim();
    match open_bracket(s) {
        Some(lt) => {
            let close = s[lt..]
                .find('>')
                .ok_or_else(|| Error::InvalidUri(format!("missing '>' in {:?}", s)))?;
            let display = unquote(&s[..lt]);
            let uri = parse_uri(&s[lt + 1..lt + close])?;
            let params = Params::parse(&s[lt + close + 1..]);
            Ok(Address {
                display_name: (!display.is_empty()).then(|| display.to_string()),
                uri,
                params,
            })
        }
        None => {
            let (uri_part, params) = match s.split_once(';') {
                Some((uri_part, params)) => (uri_part, Params::parse(params)),
                None => (s, Params::new()),
            };
            Ok(Address {
                display_name: None,
                uri: parse_uri(uri_part)?,
                params,
            })
        }
    }
}

/// Parses a comma-separated address list
pub fn parse_address_list(input: &str) -> Result<Vec<Address>> {
    let list = split_outside_quotes(input, ',')
        .into_iter()
        .map(parse_address)
        .collect::<Result<Vec<_>>>()?;
    if list.is_empty() {
        return Err(Error::InvalidUri(format!("empty address list {:?}", input)));
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_addr_with_tag() {
        let addr = parse_address("<sip:34020000002000000001@3402000000>;tag=1573749917").unwrap();
        assert_eq!(addr.display_name, None);
        assert_eq!(addr.uri.user.as_deref(), Some("34020000002000000001"));
        assert_eq!(addr.tag(), "1573749917");
    }

    #[test]
    fn test_display_name_and_uri_params() {
        let addr = parse_address("\"phone\" <sip:1001@192.168.1.10:5060;ob>;expires=3600;q=0.5").unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("phone"));
        assert_eq!(addr.uri.params.get("ob"), Some(None));
        assert_eq!(addr.expires(), Some(3600));
        assert_eq!(addr.q(), Some(0.5));
        assert_eq!(
            addr.to_string(),
            "\"phone\" <sip:1001@192.168.1.10:5060;ob>;expires=3600;q=0.5"
        );
    }

    #[test]
    fn test_addr_spec_params_belong_to_header() {
        let addr = parse_address("sip:alice@example.com;tag=abc").unwrap();
        assert!(addr.uri.params.is_empty());
        assert_eq!(addr.tag(), "abc");
    }

    #[test]
    fn test_list() {
        let list = parse_address_list("<sip:p1.example.com;lr>, <sip:p2.example.com;lr>").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].uri.host, "p2.example.com");
        assert!(parse_address_list(" ").is_err());
        assert!(parse_address("Bob <sip:bob@host").is_err());
    }
}
