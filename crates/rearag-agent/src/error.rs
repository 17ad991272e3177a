//! Error types for rearag-agent

use thiserror::Error;

/// Result type alias using rearag-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the agent
///
/// Inside the agent loop every variant is recoverable: it rolls the
/// iteration back and consumes one unit of the retry budget.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the endpoint layer (transport or protocol)
    #[error(transparent)]
    Ai(#[from] rearag_ai::Error),

    /// Model output did not contain a well-formed thought/action
    #[error("Parse error: {0}")]
    Parse(String),

    /// Action kind unknown or outside the allowed set
    #[error("Action not allowed: {0}")]
    ActionNotAllowed(String),

    /// Conversation was not in the shape an operation requires
    #[error("Invalid conversation state: {0}")]
    State(String),

    /// The run was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }

    /// Whether the underlying failure was a network/timeout/non-2xx problem
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_transport(),
            _ => false,
        }
    }
}
