//! SIP URI parsing.

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_till1, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, opt, recognize},
    sequence::{delimited, pair, preceded},
    IResult,
};

use crate::error::{Error, Result};
use crate::types::param::{Param, Params};
use crate::types::uri::{Scheme, SipUri};

fn scheme(input: &str) -> IResult<&str, Scheme> {
    alt((
        map(tag_no_case("sips:"), |_| Scheme::Sips),
        map(tag_no_case("sip:"), |_| Scheme::Sip),
    ))(input)
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'
}

/// hostname, IPv4 address or bracketed IPv6 reference
pub(crate) fn host(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(delimited(char('['), take_till1(|c| c == ']'), char(']'))),
        take_while1(is_host_char),
    ))(input)
}

pub(crate) fn port(input: &str) -> IResult<&str, u16> {
    map_res(digit1, |digits: &str| digits.parse::<u16>())(input)
}

/// `host[:port]`
pub(crate) fn host_port(input: &str) -> IResult<&str, (&str, Option<u16>)> {
    pair(host, opt(preceded(char(':'), port)))(input)
}

/// Parses a complete `host[:port]` string
pub fn parse_host_port(input: &str) -> Result<(String, Option<u16>)> {
    let (_, (h, p)) = all_consuming(host_port)(input.trim())
        .map_err(|_| Error::InvalidUri(format!("invalid host:port {:?}", input)))?;
    Ok((h.to_string(), p))
}

fn parse_uri_headers(input: &str) -> Params {
    input
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((name, value)) => Param::new(name, Some(value.to_string())),
            None => Param::flag(segment),
        })
        .collect()
}

/// Parses `sip:` / `sips:` URIs: `sip:user:password@host:port;params?headers`
pub fn parse_uri(input: &str) -> Result<SipUri> {
    let input = input.trim();
    let invalid = || Error::InvalidUri(input.to_string());

    let (rest, scheme) = scheme(input).map_err(|_| invalid())?;
    let (rest, headers) = match rest.split_once('?') {
        Some((before, headers)) => (before, parse_uri_headers(headers)),
        None => (rest, Params::new()),
    };
    let (rest, params) = match rest.split_once(';') {
        Some((before, params)) => (before, Params::parse(params)),
        None => (rest, Params::new()),
    };
    let (user, password, host_part) = match rest.rsplit_once('@') {
        Some((userinfo, host_part)) => {
            let (user, password) = match userinfo.split_once(':') {
                Some((user, password)) => (user, Some(password.to_string())),
                None => (userinfo, None),
            };
            if user.is_empty() {
                return Err(invalid());
            }
            (Some(user.to_string()), password, host_part)
        }
        None => (None, None, rest),
    };
    let (host, port) = parse_host_port(host_part).map_err(|_| invalid())?;

    Ok(SipUri {
        scheme,
        user,
        password,
        host,
        port,
        params,
        headers,
    })
}
