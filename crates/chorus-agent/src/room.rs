//! In-process chat room
//!
//! A [`LocalRoom`] plays the part of the chat platform: everything posted to
//! it is fanned out to every member, and each member sees it from its own
//! point of view (its own posts, replies to it, mentions of its handle).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::error::{Error, Result};
use crate::ids::{AgentId, ChatId};
use crate::transport::{ChatEvent, ChatTransport, Command, InboundEvent};

const ROOM_CAPACITY: usize = 1024;
const INBOX_CAPACITY: usize = 256;

/// One message posted to the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPost {
    pub chat_id: ChatId,
    pub sender_id: String,
    pub sender_is_bot: bool,
    pub text: String,
    /// Sender id of the post this one answers
    pub reply_to: Option<String>,
}

impl RoomPost {
    pub fn human(chat_id: ChatId, sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id: sender_id.into(),
            sender_is_bot: false,
            text: text.into(),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, sender_id: impl Into<String>) -> Self {
        self.reply_to = Some(sender_id.into());
        self
    }

    /// How member `me` (with optional `handle`) sees this post
    pub fn to_event(&self, me: &AgentId, handle: Option<&str>) -> ChatEvent {
        if !self.sender_is_bot {
            if let Some(command) = Command::parse(&self.text) {
                return ChatEvent::Command {
                    chat_id: self.chat_id,
                    command,
                };
            }
        }
        let is_mention = handle.is_some_and(|h| mentions(&self.text, h));
        ChatEvent::Message(InboundEvent {
            chat_id: self.chat_id,
            sender_id: self.sender_id.clone(),
            sender_is_bot: self.sender_is_bot,
            sender_is_self: self.sender_id == me.as_str(),
            text: self.text.clone(),
            is_reply_to_self: self.reply_to.as_deref() == Some(me.as_str()),
            is_mention,
        })
    }
}

/// Whether `text` contains `@handle` as a whole token, ignoring case
fn mentions(text: &str, handle: &str) -> bool {
    let handle = handle.trim_start_matches('@');
    if handle.is_empty() {
        return false;
    }
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '@'))
        .filter_map(|word| word.strip_prefix('@'))
        .any(|name| name.eq_ignore_ascii_case(handle))
}

/// Everything that happens in the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Post(RoomPost),
    Typing { chat_id: ChatId, sender_id: String },
}

/// A broadcast room shared by humans and personas
#[derive(Clone)]
pub struct LocalRoom {
    tx: broadcast::Sender<RoomEvent>,
}

impl Default for LocalRoom {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRoom {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(ROOM_CAPACITY);
        Self { tx }
    }

    /// Watch every post and typing indicator
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }

    pub fn post(&self, post: RoomPost) {
        let _ = self.tx.send(RoomEvent::Post(post));
    }

    /// Outbound side for persona `id`
    pub fn member(&self, id: AgentId) -> RoomMember {
        RoomMember {
            id,
            tx: self.tx.clone(),
        }
    }

    /// Inbox for persona `id`: every post, seen from its point of view.
    ///
    /// The bridge task stops when the returned receiver is dropped or the
    /// room closes.
    pub fn attach(&self, id: AgentId, handle: Option<String>) -> mpsc::Receiver<ChatEvent> {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let mut events = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                let post = match events.recv().await {
                    Ok(RoomEvent::Post(post)) => post,
                    Ok(RoomEvent::Typing { .. }) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(agent = %id, skipped, "inbox lagged, messages dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let event = post.to_event(&id, handle.as_deref());
                if inbox_tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        inbox_rx
    }
}

/// A persona's handle for posting to a [`LocalRoom`]
#[derive(Clone)]
pub struct RoomMember {
    id: AgentId,
    tx: broadcast::Sender<RoomEvent>,
}

impl RoomMember {
    fn post(&self, chat_id: ChatId, text: &str) -> RoomPost {
        RoomPost {
            chat_id,
            sender_id: self.id.to_string(),
            sender_is_bot: true,
            text: text.to_string(),
            reply_to: None,
        }
    }

    fn send(&self, post: RoomPost) -> Result<()> {
        self.tx
            .send(RoomEvent::Post(post))
            .map(|_| ())
            .map_err(|_| Error::Transport("room has no listeners".into()))
    }
}

#[async_trait]
impl ChatTransport for RoomMember {
    async fn send_typing(&self, chat_id: ChatId) -> Result<()> {
        let _ = self.tx.send(RoomEvent::Typing {
            chat_id,
            sender_id: self.id.to_string(),
        });
        Ok(())
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.send(self.post(chat_id, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> AgentId {
        AgentId::new("ada")
    }

    #[test]
    fn test_mentions_whole_handle() {
        assert!(mentions("hey @Ada_Bot, thoughts?", "ada_bot"));
        assert!(mentions("@ada_bot", "@ada_bot"));
        assert!(!mentions("hey @ada_bot2", "ada_bot"));
        assert!(!mentions("ada_bot without at", "ada_bot"));
        assert!(!mentions("mail me@ada_bot", "ada_bot"));
    }

    #[test]
    fn test_post_seen_by_member() {
        let post = RoomPost::human(5, "sam", "hi @ada_bot").replying_to("ada");
        let ChatEvent::Message(event) = post.to_event(&me(), Some("ada_bot")) else {
            panic!("expected a message");
        };
        assert!(event.is_mention);
        assert!(event.is_reply_to_self);
        assert!(!event.sender_is_self);
        assert_eq!(event.chat_id, 5);
    }

    #[test]
    fn test_own_post_flagged() {
        let post = RoomPost {
            sender_is_bot: true,
            ..RoomPost::human(5, "ada", "hello")
        };
        let ChatEvent::Message(event) = post.to_event(&me(), None) else {
            panic!("expected a message");
        };
        assert!(event.sender_is_self);
        assert!(!event.from_agent());
    }

    #[test]
    fn test_commands_only_from_humans() {
        let human = RoomPost::human(5, "sam", "/quiet");
        assert_eq!(
            human.to_event(&me(), None),
            ChatEvent::Command {
                chat_id: 5,
                command: Command::Quiet
            }
        );

        let bot = RoomPost {
            sender_is_bot: true,
            ..RoomPost::human(5, "bo", "/quiet")
        };
        assert!(matches!(bot.to_event(&me(), None), ChatEvent::Message(_)));
    }

    #[tokio::test]
    async fn test_attach_delivers_member_posts() {
        let room = LocalRoom::new();
        let mut inbox = room.attach(me(), Some("ada_bot".into()));
        let other = room.member(AgentId::new("bo"));

        other.send_typing(1).await.unwrap();
        other.send_text(1, "hey @ada_bot").await.unwrap();
        let Some(ChatEvent::Message(event)) = inbox.recv().await else {
            panic!("expected a message");
        };
        assert_eq!(event.sender_id, "bo");
        assert!(event.sender_is_bot && event.is_mention);

        room.post(RoomPost::human(1, "sam", "again").replying_to("ada"));
        let Some(ChatEvent::Message(event)) = inbox.recv().await else {
            panic!("expected a message");
        };
        assert!(event.is_reply_to_self);
    }
}
