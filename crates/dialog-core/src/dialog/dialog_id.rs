use std::fmt;
use std::str::FromStr;

use sipstack_sip_core::HeaderAccess;

use crate::errors::Error;

/// Identifier of a dialog: Call-ID, remote tag and local tag.
///
/// Written as `call-id:remote-tag:local-tag`. Both roles derive the same
/// triple from their own point of view, so a UAS reads the remote tag from
/// From and a UAC reads it from To.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: String,
    pub remote_tag: String,
    pub local_tag: String,
}

impl DialogId {
    pub fn new(
        call_id: impl Into<String>,
        remote_tag: impl Into<String>,
        local_tag: impl Into<String>,
    ) -> Self {
        DialogId {
            call_id: call_id.into(),
            remote_tag: remote_tag.into(),
            local_tag: local_tag.into(),
        }
    }

    /// Id as seen by the side that received the dialog-forming request
    pub fn for_uas(message: &impl HeaderAccess) -> Option<Self> {
        Some(DialogId::new(
            message.call_id()?,
            message.from()?.tag(),
            message.to()?.tag(),
        ))
    }

    /// Id as seen by the side that sent the dialog-forming request
    pub fn for_uac(message: &impl HeaderAccess) -> Option<Self> {
        Some(DialogId::new(
            message.call_id()?,
            message.to()?.tag(),
            message.from()?.tag(),
        ))
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.call_id, self.remote_tag, self.local_tag)
    }
}

impl FromStr for DialogId {
    type Err = Error;

    /// Splits from the right, since a Call-ID may itself contain colons
    fn from_str(s: &str) -> Result<Self, Error> {
        let mut parts = s.rsplitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(remote), Some(call_id)) if !call_id.is_empty() => {
                Ok(DialogId::new(call_id, remote, local))
            }
            _ => Err(Error::Config(format!("invalid dialog id {:?}", s))),
        }
    }
}
