//! Shared infrastructure for the sipstack crates: logging setup, layered
//! configuration loading and the errors both can raise.

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::{Error, Result};

pub mod prelude {
    pub use crate::config::{from_toml_str, load_config, load_env};
    pub use crate::errors::{Error, Result};
    pub use crate::logging::{setup_logging, LoggingConfig};
}
