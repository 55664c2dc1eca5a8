//! chorus-ai: chat-completion model abstraction
//!
//! This crate provides the `ChatModel` trait the persona runtime talks to,
//! the message types it exchanges, and an OpenAI-compatible provider.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::ChatModel;
pub use stream::CompletionStream;
pub use types::*;
