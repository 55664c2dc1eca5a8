//! Persona event types

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, ChatId};
use crate::scheduler::ReplyKind;

/// Events a persona broadcasts while it works
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PersonaEvent {
    /// This persona won the start of an exchange
    ExchangeStarted { chat_id: ChatId, agent: AgentId },

    /// This persona was granted a turn
    TurnTaken {
        chat_id: ChatId,
        agent: AgentId,
        turn: u32,
        closed: bool,
    },

    /// This persona wound an exchange down
    ExchangeEnded { chat_id: ChatId, agent: AgentId },

    /// A reply was posted
    Replied {
        chat_id: ChatId,
        agent: AgentId,
        kind: ReplyKind,
        text: String,
    },

    /// The model failed and a fallback line was posted instead
    FallbackUsed {
        chat_id: ChatId,
        agent: AgentId,
        error: String,
    },
}

impl PersonaEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            PersonaEvent::ExchangeStarted { chat_id, .. }
            | PersonaEvent::TurnTaken { chat_id, .. }
            | PersonaEvent::ExchangeEnded { chat_id, .. }
            | PersonaEvent::Replied { chat_id, .. }
            | PersonaEvent::FallbackUsed { chat_id, .. } => *chat_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let event = PersonaEvent::TurnTaken {
            chat_id: 9,
            agent: AgentId::new("ada"),
            turn: 2,
            closed: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "turn_taken");
        assert_eq!(json["agent"], "ada");
        assert_eq!(event.chat_id(), 9);
    }
}
