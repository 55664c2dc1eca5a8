//! chorus-agent: persona runtime and turn-taking coordinator
//!
//! Several personas watch the same chat stream. Each one decides on its own
//! whether to answer, while a single coordinator task arbitrates staged
//! exchanges between them so that turns never collide.

pub mod config;
pub mod cooldown;
pub mod dice;
pub mod error;
pub mod events;
pub mod history;
pub mod ids;
pub mod persona;
pub mod room;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod trigger;

pub use config::{DelayWindow, ExchangeConfig, ModelSettings, PersonaConfig, TriggerConfig};
pub use cooldown::CooldownTracker;
pub use dice::{Dice, FixedDice, RandomDice};
pub use error::{Error, Result};
pub use events::PersonaEvent;
pub use history::{AgentHistory, Histories};
pub use ids::{AgentId, ChatId};
pub use persona::{Persona, PersonaSettings};
pub use room::{LocalRoom, RoomEvent, RoomPost};
pub use scheduler::{Decision, ReplyKind, ReplyPlan, Scheduler, Skip};
pub use store::{Coordinator, ConversationState, StoreHandle, TurnClaim, TurnGrant};
pub use transport::{ChatEvent, ChatTransport, Command, InboundEvent, MemoryTransport, Outbound};
pub use trigger::{Trigger, TriggerRules};
