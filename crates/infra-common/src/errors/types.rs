use thiserror::Error;

/// A type alias for handling `Result`s with `Error` values
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while setting up logging or loading configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed source, failed deserialization or repeated logger setup
    #[error("configuration error: {0}")]
    Config(String),

    /// A loaded value is out of range
    #[error("validation error: {0}")]
    Validation(String),
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
