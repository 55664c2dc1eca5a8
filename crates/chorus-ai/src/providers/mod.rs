//! Chat-completion provider implementations

pub mod openai;

use crate::{CompletionOptions, Error, Message, Result};
use async_trait::async_trait;

/// Trait for anything that can turn a role-tagged history into a reply
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the next assistant reply for `messages`
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String>;
}

/// Get an API key from the provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
