//! Error types for chorus-ai

use thiserror::Error;

/// Result type alias using chorus-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a chat-completion provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The provider finished without producing any text
    #[error("Model returned an empty completion")]
    EmptyCompletion,
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Check if this error comes from a quota or rate limit rather than a fault
    pub fn is_quota(&self) -> bool {
        match self {
            Error::RateLimited { .. } => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("insufficient_quota")
                    || msg.contains("rate limit")
                    || msg.contains("quota")
                    || msg.contains("too many requests")
                    || msg.contains("429")
            }
            Error::Sse(msg) => msg.contains("429"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_typed_variant() {
        assert!(Error::RateLimited { retry_after: Some(5) }.is_quota());
    }

    #[test]
    fn test_quota_api_error_type() {
        let e = Error::api("insufficient_quota", "You exceeded your current plan");
        assert!(e.is_quota());
    }

    #[test]
    fn test_quota_api_message() {
        let e = Error::api("error", "Too many requests");
        assert!(e.is_quota());
    }

    #[test]
    fn test_quota_sse_status() {
        let e = Error::Sse("Invalid status code: 429 Too Many Requests".into());
        assert!(e.is_quota());
    }

    #[test]
    fn test_not_quota_auth() {
        let e = Error::api("invalid_request_error", "Incorrect API key provided");
        assert!(!e.is_quota());
        assert!(!Error::InvalidApiKey.is_quota());
        assert!(!Error::EmptyCompletion.is_quota());
    }
}
