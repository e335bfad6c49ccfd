//! Error types for tracegate.
//!
//! The decision path itself never fails; these errors only come from
//! configuration loading and the command line front end.

use thiserror::Error;

/// Main error type for tracegate operations.
#[derive(Error, Debug)]
pub enum TracegateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An ignore-url regular expression failed to compile
    #[error("Invalid URL pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Malformed decision request input
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for TracegateError {
    fn from(err: ::config::ConfigError) -> Self {
        TracegateError::Config(err.to_string())
    }
}

/// Result type alias for tracegate operations.
pub type Result<T> = std::result::Result<T, TracegateError>;
