//! Request-line and status-line parsers.

use nom::{
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::{char, digit1, space1},
    combinator::{all_consuming, map_res, opt, rest as remainder},
    sequence::{preceded, tuple},
    IResult,
};

use crate::error::{Error, Result};
use crate::parser::uri::parse_uri;
use crate::parser::utils::is_token_char;
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::SipUri;
use crate::types::SIP_VERSION;

fn version(input: &str) -> IResult<&str, &str> {
    tag(SIP_VERSION)(input)
}

fn request_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (remaining, (method, _, uri, _, ver)) = all_consuming(tuple((
        take_while1(is_token_char),
        char(' '),
        take_till1(|c| c == ' '),
        char(' '),
        version,
    )))(input)?;
    Ok((remaining, (method, uri, ver)))
}

fn status_line(input: &str) -> IResult<&str, (&str, u16, &str)> {
    let (remaining, (ver, _, code, reason)) = all_consuming(tuple((
        version,
        space1,
        map_res(digit1, |d: &str| d.parse::<u16>()),
        opt(preceded(space1, remainder)),
    )))(input)?;
    Ok((remaining, (ver, code, reason.unwrap_or(""))))
}

/// True when the line is a status line rather than a request line
pub fn is_status_line(line: &str) -> bool {
    line.starts_with(SIP_VERSION)
}

/// `METHOD SP Request-URI SP SIP/2.0`
pub fn parse_request_line(line: &str) -> Result<(Method, SipUri, String)> {
    let (_, (method, uri, version)) =
        request_line(line).map_err(|_| Error::MalformedStartLine(line.to_string()))?;
    Ok((method.parse()?, parse_uri(uri)?, version.to_string()))
}

/// `SIP/2.0 SP code SP reason`; the reason may contain spaces
pub fn parse_status_line(line: &str) -> Result<(String, StatusCode, String)> {
    let (_, (version, code, reason)) =
        status_line(line).map_err(|_| Error::MalformedStartLine(line.to_string()))?;
    let status = StatusCode::from_u16(code)?;
    Ok((version.to_string(), status, reason.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line() {
        let (method, uri, version) =
            parse_request_line("REGISTER sip:34020000002000000001@3402000000 SIP/2.0").unwrap();
        assert_eq!(method, Method::Register);
        assert_eq!(uri.host, "3402000000");
        assert_eq!(version, "SIP/2.0");
    }

    #[test]
    fn test_request_line_needs_three_parts() {
        assert!(parse_request_line("REGISTER sip:a@b").is_err());
        assert!(parse_request_line("REGISTER sip:a@b SIP/2.0 extra").is_err());
        assert!(parse_request_line("REGISTER tel:123 SIP/2.0").is_err());
    }

    #[test]
    fn test_status_line() {
        let (_, status, reason) = parse_status_line("SIP/2.0 481 Call/Transaction Does Not Exist").unwrap();
        assert_eq!(status, StatusCode::CallOrTransactionDoesNotExist);
        assert_eq!(reason, "Call/Transaction Does Not Exist");

        let (_, status, reason) = parse_status_line("SIP/2.0 200").unwrap();
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(reason, "");
        assert!(parse_status_line("SIP/2.0 OK 200").is_err());
        assert!(parse_status_line("SIP/2.0 999 Nope").is_err());
    }
}
