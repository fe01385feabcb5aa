//! Error types for billwatch

use thiserror::Error;

/// Result type alias using billwatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for billwatch operations
///
/// Every variant is fatal to the run that produced it. Nothing is retried
/// here; the invoking environment decides whether to run again.
#[derive(Error, Debug)]
pub enum Error {
    /// Could not establish a session with the metrics backend
    #[error("Session error: {0}")]
    Session(String),

    /// A metrics call failed, or the aggregate figure had no datapoint
    #[error("Backend error: {0}")]
    Backend(String),

    /// The notification could not be delivered
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a session error
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a delivery error
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

