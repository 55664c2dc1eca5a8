//! Private per-chat dialogue history
//!
//! Each persona keeps its own view of every chat: its system line followed by
//! the prompts it answered and the replies it gave. Nothing here is shared.

use chorus_ai::Message;
use std::collections::{HashMap, VecDeque};

use crate::ids::ChatId;

/// One persona's history in one chat
#[derive(Debug, Clone)]
pub struct AgentHistory {
    system: Message,
    entries: VecDeque<Message>,
    limit: usize,
}

impl AgentHistory {
    /// `limit` counts non-system entries; the system line is always kept
    pub fn new(system_prompt: impl Into<String>, limit: usize) -> Self {
        Self {
            system: Message::system(system_prompt),
            entries: VecDeque::with_capacity(limit.saturating_add(1)),
            limit,
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    fn push(&mut self, message: Message) {
        self.entries.push_back(message);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    /// The system line followed by the retained entries, oldest first
    pub fn messages(&self) -> Vec<Message> {
        std::iter::once(self.system.clone())
            .chain(self.entries.iter().cloned())
            .collect()
    }

    /// Number of non-system entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry except the system line
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// All of a persona's histories, created on first use
#[derive(Debug, Clone)]
pub struct Histories {
    system_prompt: String,
    limit: usize,
    chats: HashMap<ChatId, AgentHistory>,
}

impl Histories {
    pub fn new(system_prompt: impl Into<String>, limit: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            limit,
            chats: HashMap::new(),
        }
    }

    pub fn chat(&mut self, chat_id: ChatId) -> &mut AgentHistory {
        self.chats
            .entry(chat_id)
            .or_insert_with(|| AgentHistory::new(self.system_prompt.clone(), self.limit))
    }

    pub fn get(&self, chat_id: ChatId) -> Option<&AgentHistory> {
        self.chats.get(&chat_id)
    }

    /// Forget `chat_id`; returns whether there was anything to forget
    pub fn reset(&mut self, chat_id: ChatId) -> bool {
        self.chats.remove(&chat_id).is_some_and(|h| !h.is_empty())
    }
}
