//! Error types for the Tollgate engine.

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// A tier token that belongs to neither vocabulary. Always fails closed.
    #[error("Invalid tier: {0}")]
    InvalidTier(String),

    /// The counter backend could not be reached within its bounds.
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// A policy that cannot be enforced (zero window, zero limit, unknown scope).
    #[error("Policy misconfigured: {0}")]
    PolicyMisconfigured(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
