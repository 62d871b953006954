//! Per-header value parsers.
//!
//! [`parse_header`] dispatches on the registered [`HeaderName`]. Headers the
//! engine reads get structured parsers; the rest are kept verbatim.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, map_res},
    sequence::{delimited, separated_pair, tuple},
    IResult,
};

use crate::error::{Error, Result};
use crate::parser::address::{parse_address, parse_address_list};
use crate::parser::uri::{host_port, parse_uri};
use crate::parser::utils::{is_token_char, split_outside_quotes, unquote};
use crate::types::headers::{Auth, CSeq, Event, HeaderName, SubscriptionState, TypedHeader};
use crate::types::method::Method;
use crate::types::param::Params;
use crate::types::via::Via;

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

/// `SIP / 2.0 / UDP`, with optional whitespace around the slashes
fn sent_protocol(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let slash = || delimited(space0, char('/'), space0);
    let (rest, (name, _, version, _, transport)) =
        tuple((token, slash(), token, slash(), token))(input)?;
    Ok((rest, (name, version, transport)))
}

/// Parses a single Via value. The branch parameter is mandatory.
pub fn parse_via(input: &str) -> Result<Via> {
    let value = input.trim();
    let invalid = |reason: &str| Error::invalid_header(HeaderName::Via, value, reason);

    let (rest, (name, version, transport)) =
        sent_protocol(value).map_err(|_| invalid("bad sent-protocol"))?;
    let (rest, _) = space1::<_, nom::error::Error<&str>>(rest)
        .map_err(|_| invalid("missing sent-by"))?;
    let (rest, (host, port)) = host_port(rest).map_err(|_| invalid("bad sent-by"))?;

    let rest = rest.trim_start();
    let params = match rest.strip_prefix(';') {
        Some(params) => Params::parse(params),
        None if rest.is_empty() => return Err(invalid("no parameters")),
        None => return Err(invalid("unexpected text after sent-by")),
    };

    let via = Via {
        protocol: format!("{}/{}", name, version),
        transport: transport.to_ascii_uppercase(),
        host: host.to_string(),
        port,
        params,
    };
    if via.branch().is_none() {
        return Err(invalid("branch parameter is mandatory"));
    }
    Ok(via)
}

/// Parses a Via line that may carry several comma-separated values
pub fn parse_via_list(input: &str) -> Result<Vec<Via>> {
    split_outside_quotes(input, ',')
        .into_iter()
        .map(parse_via)
        .collect()
}

/// `4711 INVITE`
pub fn parse_cseq(input: &str) -> Result<CSeq> {
    let value = input.trim();
    let (_, (seq, method)) = all_consuming(separated_pair(
        map_res(digit1, |d: &str| d.parse::<u32>()),
        space1,
        token,
    ))(value)
    .map_err(|_: nom::Err<nom::error::Error<&str>>| {
        Error::invalid_header(HeaderName::CSeq, value, "expected \"number METHOD\"")
    })?;
    Ok(CSeq::new(seq, method.parse::<Method>()?))
}

/// `Catalog;id=2`
pub fn parse_event(input: &str) -> Result<Event> {
    let value = input.trim();
    let (event_type, rest) = value.split_once(';').unwrap_or((value, ""));
    let event_type = event_type.trim();
    if event_type.is_empty() || !event_type.chars().all(is_token_char) {
        return Err(Error::invalid_header(HeaderName::Event, value, "bad event type"));
    }
    let mut params = Params::parse(rest);
    let id = params.remove("id").and_then(|p| p.value);
    Ok(Event {
        event_type: event_type.to_string(),
        id,
        params,
    })
}

/// `active;expires=3600` / `terminated;reason=timeout;retry-after=30`
pub fn parse_subscription_state(input: &str) -> Result<SubscriptionState> {
    let value = input.trim();
    let invalid = |reason: &str| Error::invalid_header(HeaderName::SubscriptionState, value, reason);
    let (state, rest) = value.split_once(';').unwrap_or((value, ""));
    let state = state.trim();
    if state.is_empty() {
        return Err(invalid("empty state"));
    }
    let params = Params::parse(rest);
    let number = |name: &str| -> Result<Option<u32>> {
        params
            .value(name)
            .map(|v| v.parse::<u32>().map_err(|_| invalid("bad number")))
            .transpose()
    };
    Ok(SubscriptionState {
        state: state.to_string(),
        reason: params.value("reason").map(str::to_string),
        expires: number("expires")?,
        retry_after: number("retry-after")?,
    })
}

/// `Digest realm="...", nonce="...", algorithm=MD5`
pub fn parse_auth(name: HeaderName, input: &str) -> Result<Auth> {
    let value = input.trim();
    let invalid = |reason: &str| Error::invalid_header(name, value, reason);
    let (scheme, rest) = value
        .split_once(|c: char| c.is_ascii_whitespace())
        .ok_or_else(|| invalid("missing parameters"))?;

    let mut auth = Auth {
        scheme: scheme.to_string(),
        params: Vec::new(),
    };
    for pair in split_outside_quotes(rest, ',') {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| invalid("parameter without value"))?;
        let raw = raw.trim();
        let quoted = raw.starts_with('"');
        auth.set_raw(key.trim().to_string(), unquote(raw).to_string(), quoted);
    }

    if name == HeaderName::Authorization || name == HeaderName::ProxyAuthorization {
        if let Some(uri) = auth.get("uri") {
            parse_uri(uri)?;
        }
    }
    Ok(auth)
}

fn number<T: std::str::FromStr>(name: HeaderName, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::invalid_header(name, value, "expected a number"))
}

/// Parses the value of a registered header into one or more typed values
pub fn parse_header(name: HeaderName, value: &str) -> Result<Vec<TypedHeader>> {
    let value = value.trim();
    if value.is_empty() && name.is_singular() {
        return Err(Error::invalid_header(name, value, "empty value"));
    }

    let header = match name {
        HeaderName::Via => {
            return Ok(parse_via_list(value)?
                .into_iter()
                .map(TypedHeader::Via)
                .collect())
        }
        HeaderName::From => TypedHeader::From(parse_address(value)?),
        HeaderName::To => TypedHeader::To(parse_address(value)?),
        HeaderName::Contact => TypedHeader::Contact(parse_address_list(value)?),
        HeaderName::Route => TypedHeader::Route(parse_address_list(value)?),
        HeaderName::RecordRoute => TypedHeader::RecordRoute(parse_address_list(value)?),
        HeaderName::CallId => TypedHeader::CallId(value.to_string()),
        HeaderName::CSeq => TypedHeader::CSeq(parse_cseq(value)?),
        HeaderName::MaxForwards => TypedHeader::MaxForwards(number(name, value)?),
        HeaderName::Expires => TypedHeader::Expires(number(name, value)?),
        HeaderName::ContentLength => TypedHeader::ContentLength(number(name, value)?),
        HeaderName::ContentType => TypedHeader::ContentType(value.to_string()),
        HeaderName::UserAgent => TypedHeader::UserAgent(value.to_string()),
        HeaderName::Event => TypedHeader::Event(parse_event(value)?),
        HeaderName::SubscriptionState => {
            TypedHeader::SubscriptionState(parse_subscription_state(value)?)
        }
        HeaderName::WwwAuthenticate => TypedHeader::WwwAuthenticate(parse_auth(name, value)?),
        HeaderName::Authorization => TypedHeader::Authorization(parse_auth(name, value)?),
        HeaderName::ProxyAuthenticate => TypedHeader::ProxyAuthenticate(parse_auth(name, value)?),
        HeaderName::ProxyAuthorization => {
            TypedHeader::ProxyAuthorization(parse_auth(name, value)?)
        }
        other => TypedHeader::Other(other, value.to_string()),
    };
    Ok(vec![header])
}
