//! Error types for chorus-agent

use std::time::Duration;
use thiserror::Error;

/// Result type alias using chorus-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a persona
#[derive(Error, Debug)]
pub enum Error {
    /// The model call failed
    #[error("Model unavailable: {0}")]
    ModelUnavailable(#[from] chorus_ai::Error),

    /// The model did not answer within the configured bound
    #[error("Model unavailable: no reply within {0:?}")]
    ModelTimeout(Duration),

    /// The shared conversation coordinator is gone
    #[error("Conversation store unavailable")]
    StoreUnavailable,

    /// Sending to the chat failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Check if this error means the model could not produce a reply
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, Error::ModelUnavailable(_) | Error::ModelTimeout(_))
    }

    /// Check if the model refused because of a quota or rate limit
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::ModelUnavailable(e) if e.is_quota())
    }
}
