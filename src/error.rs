//! jsbridge error types

use thiserror::Error;

/// jsbridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied a bad or missing parameter
    #[error("Parameter error: {0}")]
    Param(String),

    /// No matching group or agent
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Envelope encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket write failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// No reply within the deadline
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for jsbridge operations
pub type Result<T> = std::result::Result<T, Error>;
