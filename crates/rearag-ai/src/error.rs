//! Error types for rearag-ai

use thiserror::Error;

/// Result type alias using rearag-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the generation or retrieval endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed (connection, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint answered with a non-2xx status
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    /// Response body did not match the endpoint contract
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether this is a transport-level failure (network, timeout, non-2xx)
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Status { .. })
    }

    /// Whether the request timed out
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}
