//! Next-hop selection for outbound messages

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use sipstack_sip_core::{HeaderAccess, HeaderName, Request, Response};

use crate::errors::{Error, Result};

/// Port used when neither the URI nor the Via names one
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Where an outbound message goes: host, port and Via transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub host: String,
    pub port: u16,
    /// Transport token of the top Via, upper case
    pub transport: String,
}

impl Hop {
    /// First Route URI, else the request-URI; transport from the top Via
    pub fn for_request(request: &Request) -> Result<Self> {
        let via = request.via().ok_or_else(|| missing(HeaderName::Via))?;
        let uri = request
            .routes()
            .first()
            .map(|route| &route.uri)
            .unwrap_or(&request.uri);
        Ok(Hop {
            host: uri.host.clone(),
            port: uri.port.unwrap_or(DEFAULT_SIP_PORT),
            transport: via.transport.to_ascii_uppercase(),
        })
    }

    /// Via `received`/`rport` when present, else its sent-by
    pub fn for_response(response: &Response) -> Result<Self> {
        let via = response.via().ok_or_else(|| missing(HeaderName::Via))?;
        let host = via.received().unwrap_or(&via.host).to_string();
        let port = match via.rport() {
            Some(Some(port)) => port,
            _ => via.port.unwrap_or(DEFAULT_SIP_PORT),
        };
        Ok(Hop {
            host,
            port,
            transport: via.transport.to_ascii_uppercase(),
        })
    }

    /// IP literals are used as is; names go through the system resolver
    pub async fn resolve(&self) -> Result<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        let mut addrs = tokio::net::lookup_host((host, self.port))
            .await
            .map_err(|err| Error::Resolve {
                host: self.host.clone(),
                reason: err.to_string(),
            })?;
        addrs.next().ok_or_else(|| Error::Resolve {
            host: self.host.clone(),
            reason: "no addresses".to_string(),
        })
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.transport)
    }
}

fn missing(name: HeaderName) -> Error {
    Error::Sip(sipstack_sip_core::Error::MissingMandatoryHeader(name))
}
