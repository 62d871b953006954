//! Layered configuration loading.
//!
//! A file source is read first and environment variables override it.
//! Variables use `PREFIX__SECTION__KEY`, so `SIPSTACK__TIMERS__T1=250`
//! overrides `[timers] t1` for the prefix `SIPSTACK`.

use std::path::Path;

use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::Result;

/// Loads `T` from a file (format picked by extension) with environment overrides
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>, env_prefix: &str) -> Result<T> {
    let path = path.as_ref();
    debug!(path = %path.display(), prefix = env_prefix, "loading configuration");
    let settings = Config::builder()
        .add_source(File::from(path))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(settings.try_deserialize()?)
}

/// Loads `T` from environment variables alone
pub fn load_env<T: DeserializeOwned>(env_prefix: &str) -> Result<T> {
    let settings = Config::builder()
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(settings.try_deserialize()?)
}

/// Parses `T` from a TOML document
pub fn from_toml_str<T: DeserializeOwned>(source: &str) -> Result<T> {
    Ok(toml::from_str(source)?)
}
