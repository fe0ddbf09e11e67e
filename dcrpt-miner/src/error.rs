//! Common error types for dcrpt-miner.
//!
//! This module provides a centralized Error enum using thiserror, with
//! conversions from the underlying error types used throughout the crate.
//! Transport failures are recovered by the connection manager; only
//! [`Error::PoolsExhausted`] is meant to end the process, and even that is
//! returned to the embedding application rather than acted upon here.

use thiserror::Error;

/// Main error type for dcrpt-miner operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or unexpected pool messages
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Pool communication errors
    #[error("Pool error: {0}")]
    Pool(String),

    /// URL prefix does not name a known pool family
    #[error("Unknown pool scheme in '{0}'")]
    UnknownPoolScheme(String),

    #[error("Missing pool credentials: '{0}' is not configured")]
    MissingCredentials(&'static str),

    /// An operation needed the transport but no session is established
    #[error("Not connected to pool")]
    NotConnected,

    /// Every configured endpoint failed and the retry policy says stop
    #[error("All pool endpoints exhausted")]
    PoolsExhausted,

    /// API errors
    #[error("API error: {0}")]
    Api(String),
}

impl From<ext_config::ConfigError> for Error {
    fn from(e: ext_config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
