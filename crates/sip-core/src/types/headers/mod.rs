//! SIP header registry, typed header values and the per-message header table.

pub mod header_name;
pub mod typed_header;
pub mod values;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use header_name::HeaderName;
pub use typed_header::TypedHeader;
pub use values::{Auth, AuthParam, CSeq, Event, SubscriptionState};

/// Header table of a message, keyed by name and iterated in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    table: BTreeMap<HeaderName, Vec<TypedHeader>>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Replaces every value of the header's name with this one.
    ///
    /// A raw value under a structured name is stored parsed. One that does
    /// not parse stays raw, where the typed accessors do not see it.
    pub fn set(&mut self, header: TypedHeader) {
        let values = match header {
            TypedHeader::Other(name, raw) if name.is_structured() => {
                TypedHeader::from_raw(name, &raw).unwrap_or_else(|_| vec![TypedHeader::Other(name, raw)])
            }
            header => vec![header],
        };
        if let Some(name) = values.first().map(TypedHeader::name) {
            self.table.insert(name, values);
        }
    }

    /// Adds a value after any existing ones.
    ///
    /// A raw value under a structured name is parsed first and fails with
    /// the parse error. Fails with [`Error::DuplicateHeader`] when the header
    /// is singular and already present.
    pub fn append(&mut self, header: TypedHeader) -> Result<()> {
        let values = match header {
            TypedHeader::Other(name, raw) if name.is_structured() => TypedHeader::from_raw(name, &raw)?,
            header => vec![header],
        };
        for header in values {
            let name = header.name();
            let existing = self.table.entry(name).or_default();
            if name.is_singular() && !existing.is_empty() {
                return Err(Error::DuplicateHeader(name));
            }
            existing.push(header);
        }
        Ok(())
    }

    pub fn get(&self, name: HeaderName) -> Option<&TypedHeader> {
        self.table.get(&name).and_then(|values| values.first())
    }

    pub fn get_mut(&mut self, name: HeaderName) -> Option<&mut TypedHeader> {
        self.table.get_mut(&name).and_then(|values| values.first_mut())
    }

    pub fn get_all(&self, name: HeaderName) -> &[TypedHeader] {
        self.table.get(&name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_all_mut(&mut self, name: HeaderName) -> Option<&mut Vec<TypedHeader>> {
        self.table.get_mut(&name)
    }

    pub fn remove(&mut self, name: HeaderName) -> Vec<TypedHeader> {
        self.table.remove(&name).unwrap_or_default()
    }

    pub fn contains(&self, name: HeaderName) -> bool {
        self.table.get(&name).map_or(false, |values| !values.is_empty())
    }

    /// All values in wire order
    pub fn iter(&self) -> impl Iterator<Item = &TypedHeader> {
        self.table.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
