//! Boundary to the chat platform
//!
//! Inbound traffic reaches a persona as [`ChatEvent`]s; outbound traffic
//! leaves through a [`ChatTransport`]. [`MemoryTransport`] records outbound
//! calls instead of sending them and is what tests and the local room use.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::ids::ChatId;

/// A chat message as seen by one persona
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub sender_id: String,
    /// Sent by any bot account, including other personas
    pub sender_is_bot: bool,
    /// Sent by the receiving persona itself
    pub sender_is_self: bool,
    pub text: String,
    /// Replies to a message the receiving persona sent
    pub is_reply_to_self: bool,
    /// Mentions the receiving persona's handle
    pub is_mention: bool,
}

impl InboundEvent {
    /// A plain human message with no reply or mention
    pub fn new(chat_id: ChatId, sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id: sender_id.into(),
            sender_is_bot: false,
            sender_is_self: false,
            text: text.into(),
            is_reply_to_self: false,
            is_mention: false,
        }
    }

    /// Whether another persona (or any bot) wrote this
    pub fn from_agent(&self) -> bool {
        self.sender_is_bot && !self.sender_is_self
    }
}

/// Operator commands typed into the chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// End the running exchange and stop new ones everywhere
    Quiet,
    /// Allow exchanges again
    Resume,
    /// Forget this chat's history
    ResetHistory,
}

impl Command {
    /// Parse `/quiet`, `/resume` or `/reset`, optionally addressed as `/quiet@somebot`.
    ///
    /// Anything after the command word is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "quiet" => Some(Command::Quiet),
            "resume" => Some(Command::Resume),
            "reset" => Some(Command::ResetHistory),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Quiet => "quiet",
            Command::Resume => "resume",
            Command::ResetHistory => "reset",
        }
    }
}

/// Everything a persona's inbox can carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message(InboundEvent),
    Command { chat_id: ChatId, command: Command },
}

impl ChatEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            ChatEvent::Message(event) => event.chat_id,
            ChatEvent::Command { chat_id, .. } => *chat_id,
        }
    }
}

/// Outbound side of the chat platform
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Show a typing indicator in `chat_id`
    async fn send_typing(&self, chat_id: ChatId) -> Result<()>;

    /// Post `text` to `chat_id`
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()>;
}

/// One recorded outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Typing { chat_id: ChatId },
    Text { chat_id: ChatId, text: String },
}

/// Transport that records what would have been sent
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<Outbound>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every outbound call so far, oldest first
    pub fn outbound(&self) -> Vec<Outbound> {
        self.sent.lock().clone()
    }

    /// Only the posted texts
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|o| match o {
                Outbound::Text { text, .. } => Some(text.clone()),
                Outbound::Typing { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn send_typing(&self, chat_id: ChatId) -> Result<()> {
        self.sent.lock().push(Outbound::Typing { chat_id });
        Ok(())
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.sent.lock().push(Outbound::Text {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/quiet"), Some(Command::Quiet));
        assert_eq!(Command::parse("  /Resume please"), Some(Command::Resume));
        assert_eq!(Command::parse("/reset@chorus_bot"), Some(Command::ResetHistory));
    }

    #[test]
    fn test_parse_rejects_non_commands() {
        assert_eq!(Command::parse("quiet"), None);
        assert_eq!(Command::parse("/quietly"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("be /quiet"), None);
    }

    #[test]
    fn test_from_agent() {
        let mut event = InboundEvent::new(1, "b", "hi");
        assert!(!event.from_agent());
        event.sender_is_bot = true;
        assert!(event.from_agent());
        event.sender_is_self = true;
        assert!(!event.from_agent());
    }

    #[tokio::test]
    async fn test_memory_transport_records() {
        let transport = MemoryTransport::new();
        transport.send_typing(3).await.unwrap();
        transport.send_text(3, "hello").await.unwrap();

        assert_eq!(
            transport.outbound(),
            vec![
                Outbound::Typing { chat_id: 3 },
                Outbound::Text {
                    chat_id: 3,
                    text: "hello".into()
                },
            ]
        );
        assert_eq!(transport.texts(), vec!["hello".to_string()]);
        transport.clear();
        assert!(transport.outbound().is_empty());
    }
}
