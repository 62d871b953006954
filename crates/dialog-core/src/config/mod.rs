//! Stack configuration
//!
//! [`StackConfig`] can be assembled in code with the `with_*` builders, read
//! from a TOML string, or loaded from a file with `SIPSTACK__` environment
//! overrides:
//!
//! ```text
//! tu_count = 1024
//! request_timeout = 0          # milliseconds, 0 = no extra deadline
//! user_agent = "sipstack"
//!
//! [timers]
//! t1 = 500
//! t2 = 4000
//!
//! [[listening_points]]
//! ip = "0.0.0.0"
//! port = 5060
//! transport = "UDP"
//! contact = "<sip:34020000002000000001@203.0.113.9:5060>"
//! ```
//!
//! `SIPSTACK__REQUEST_TIMEOUT=5000` overrides the file value.
//! [`StackConfig::from_env`] reads the same variables with no file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sipstack_infra_common::config::{from_toml_str, load_config, load_env};
use sipstack_sip_transport::TransportKind;

use crate::errors::Result;
use crate::transaction::TimerSettings;

/// Environment prefix for [`StackConfig::from_file`] overrides
pub const ENV_PREFIX: &str = "SIPSTACK";

/// Default registry pre-allocation
pub const DEFAULT_TU_COUNT: usize = 1024;

/// One socket the stack listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListeningPointConfig {
    pub ip: String,
    /// 0 binds an ephemeral port
    pub port: u16,
    pub transport: TransportKind,
    /// Contact written on dialog-forming messages that carry none, for NAT setups
    #[serde(default)]
    pub contact: Option<String>,
}

impl ListeningPointConfig {
    pub fn new(ip: impl Into<String>, port: u16, transport: TransportKind) -> Self {
        ListeningPointConfig {
            ip: ip.into(),
            port,
            transport,
            contact: None,
        }
    }

    pub fn udp(ip: impl Into<String>, port: u16) -> Self {
        Self::new(ip, port, TransportKind::Udp)
    }

    pub fn tcp(ip: impl Into<String>, port: u16) -> Self {
        Self::new(ip, port, TransportKind::Tcp)
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

/// Configuration consumed by [`Stack`](crate::Stack)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Expected concurrent transactions, used to size the registries
    pub tu_count: usize,
    /// Per-request deadline in milliseconds; 0 leaves only the transaction timers
    pub request_timeout: u64,
    pub user_agent: Option<String>,
    pub timers: TimerSettings,
    pub listening_points: Vec<ListeningPointConfig>,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            tu_count: DEFAULT_TU_COUNT,
            request_timeout: 0,
            user_agent: Some(format!("sipstack/{}", env!("CARGO_PKG_VERSION"))),
            timers: TimerSettings::default(),
            listening_points: Vec::new(),
        }
    }
}

impl StackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a TOML file, then applies `SIPSTACK__*` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(load_config(path, ENV_PREFIX)?)
    }

    /// Defaults overlaid with `SIPSTACK__*` environment variables
    pub fn from_env() -> Result<Self> {
        Ok(load_env(ENV_PREFIX)?)
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(from_toml_str(source)?)
    }

    pub fn with_tu_count(mut self, tu_count: usize) -> Self {
        self.tu_count = tu_count;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout.as_millis() as u64;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn without_user_agent(mut self) -> Self {
        self.user_agent = None;
        self
    }

    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_listening_point(mut self, listening_point: ListeningPointConfig) -> Self {
        self.listening_points.push(listening_point);
        self
    }

    /// `request_timeout` as a deadline, `None` when unset
    pub fn request_deadline(&self) -> Option<Duration> {
        (self.request_timeout > 0).then(|| Duration::from_millis(self.request_timeout))
    }
}
