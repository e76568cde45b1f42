//! Relay error types
//!
//! The four error kinds a client can observe. Each carries a stable wire code
//! that is sent in the `error` event.

use thiserror::Error;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors surfaced to a relay client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Missing or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The link to the generation engine failed or dropped
    #[error("Upstream connection error: {0}")]
    UpstreamConnection(String),

    /// A client frame could not be parsed or is not allowed
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The engine reported an error mid-turn
    #[error("Generation error: {0}")]
    Generation(String),
}

impl RelayError {
    /// Stable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Configuration(_) => "configuration_error",
            RelayError::UpstreamConnection(_) => "upstream_connection_error",
            RelayError::MalformedMessage(_) => "malformed_message",
            RelayError::Generation(_) => "generation_error",
        }
    }

    /// Human-readable detail without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            RelayError::Configuration(m)
            | RelayError::UpstreamConnection(m)
            | RelayError::MalformedMessage(m)
            | RelayError::Generation(m) => m,
        }
    }
}

impl From<crate::core::realtime::RealtimeError> for RelayError {
    fn from(err: crate::core::realtime::RealtimeError) -> Self {
        RelayError::UpstreamConnection(err.to_string())
    }
}
