//! Errors shared by the infrastructure helpers.

pub mod types;

pub use types::{Error, Result};
