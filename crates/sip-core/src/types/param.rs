//! # SIP Parameters
//!
//! Parameters attach to URIs (`sip:alice@host;transport=tcp`) and to header
//! values (`<sip:bob@host>;tag=1928301774`). A parameter is either a flag
//! (`lr`, `rport`) or a `name=value` pair. Names are unique within a set and
//! compared case-insensitively; insertion order is kept so that a parsed
//! value serializes back the way it arrived.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single `name[=value]` parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: Option<String>,
}

impl Param {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Param {
            name: name.into(),
            value,
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Param::new(name, None)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// An ordered set of parameters with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new() -> Self {
        Params(Vec::new())
    }

    /// Parses `a=b;c;d=e`. Empty segments are skipped; a repeated name keeps the last value.
    pub fn parse(input: &str) -> Self {
        let mut params = Params::new();
        for segment in input.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            match segment.split_once('=') {
                Some((name, value)) => params.set(name.trim(), Some(value.trim().to_string())),
                None => params.set(segment, None),
            }
        }
        params
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// `None` if absent, `Some(None)` for a flag, `Some(Some(v))` for a valued parameter
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.position(name).map(|i| self.0[i].value.as_deref())
    }

    /// Value of a `name=value` parameter; flags and absent names yield `None`
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Inserts or replaces, keeping the original position on replace
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.0[i].value = value,
            None => self.0.push(Param::new(name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Param> {
        self.position(name).map(|i| self.0.remove(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Writes each parameter with a leading `;`
impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.0 {
            write!(f, ";{}", param)?;
        }
        Ok(())
    }
}

impl FromIterator<Param> for Params {
    fn from_iter<T: IntoIterator<Item = Param>>(iter: T) -> Self {
        let mut params = Params::new();
        for p in iter {
            params.set(p.name, p.value);
        }
        params
    }
}
