//! Per-persona turn scheduling
//!
//! [`Scheduler::decide`] runs once per inbound message and answers one
//! question: does this persona reply, and if so with what prompt after what
//! delay. Checks run in a fixed order:
//!
//! 1. messages from the persona itself are ignored
//! 2. targeted messages get a reply, limited only by the targeted gap
//! 3. an on-topic question outside an exchange tries to open one
//! 4. inside an exchange the persona competes for the next turn
//! 5. otherwise an on-topic message may earn a spontaneous reply
//!
//! Every store mutation happens here, before any delay, so a turn is reserved
//! by the time the persona starts "typing".

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::{DelayWindow, ExchangeConfig, PersonaConfig};
use crate::cooldown::CooldownTracker;
use crate::dice::Dice;
use crate::error::Result;
use crate::events::PersonaEvent;
use crate::ids::{AgentId, ChatId};
use crate::store::{StoreHandle, TurnClaim};
use crate::transport::InboundEvent;
use crate::trigger::{Trigger, TriggerRules};

/// Why a reply is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyKind {
    /// Answer to a mention or a reply
    Targeted,
    /// First turn of an exchange this persona opened
    Opening { turn: u32 },
    /// A later turn of an exchange
    Turn { turn: u32, closed: bool },
    /// Unsolicited answer to an on-topic message
    Spontaneous,
}

/// Why a message was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    OwnMessage,
    TargetedTooSoon,
    /// Another persona opened the exchange first
    StartLost,
    /// Won the start but let someone else speak first
    OpeningDeclined,
    OpeningRefused,
    ContinueDeclined,
    /// The coordinator handed the turn to nobody, or to someone else
    TurnRefused,
    /// Messages from other personas only move exchanges along
    AgentMessage,
    OffTopic,
    CoolingDown,
    ChanceDeclined,
    StoreUnavailable,
}

/// A reply the persona has committed to
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyPlan {
    pub chat_id: ChatId,
    pub kind: ReplyKind,
    /// User line handed to the model
    pub prompt: String,
    /// How long to "type" before answering
    pub delay: Duration,
    /// Line to post if the model fails
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Ignore(Skip),
    Reply(ReplyPlan),
}

impl Decision {
    pub fn plan(&self) -> Option<&ReplyPlan> {
        match self {
            Decision::Reply(plan) => Some(plan),
            Decision::Ignore(_) => None,
        }
    }

    pub fn skip(&self) -> Option<Skip> {
        match self {
            Decision::Ignore(skip) => Some(*skip),
            Decision::Reply(_) => None,
        }
    }
}

/// Decision state owned by one persona
pub struct Scheduler {
    agent: AgentId,
    persona: PersonaConfig,
    exchange: ExchangeConfig,
    rules: TriggerRules,
    spontaneous: CooldownTracker,
    targeted: CooldownTracker,
    store: StoreHandle,
    dice: Box<dyn Dice>,
    events: broadcast::Sender<PersonaEvent>,
}

impl Scheduler {
    pub fn new(
        persona: PersonaConfig,
        exchange: ExchangeConfig,
        store: StoreHandle,
        dice: Box<dyn Dice>,
        events: broadcast::Sender<PersonaEvent>,
    ) -> Result<Self> {
        persona.validate()?;
        exchange.validate()?;
        let rules = TriggerRules::new(&persona.triggers)?;
        Ok(Self {
            agent: persona.id.clone(),
            spontaneous: CooldownTracker::new(persona.spontaneous_cooldown()),
            targeted: CooldownTracker::new(persona.targeted_min_gap()),
            persona,
            exchange,
            rules,
            store,
            dice,
            events,
        })
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub fn persona(&self) -> &PersonaConfig {
        &self.persona
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Decide what to do about `event`, observed at `now`
    pub async fn decide(&mut self, event: &InboundEvent, now: Instant) -> Decision {
        let decision = self.evaluate(event, now).await;
        if let Decision::Ignore(skip) = decision {
            tracing::debug!(chat = event.chat_id, agent = %self.agent, ?skip, "no reply");
        }
        decision
    }

    /// Re-check an active exchange in `chat_id` without a new message.
    ///
    /// `last_text` is the latest message seen there and stands in as the
    /// trigger for the turn prompt.
    pub async fn decide_nudge(&mut self, chat_id: ChatId, last_text: &str, now: Instant) -> Decision {
        let active = match self.store.snapshot(chat_id).await {
            Ok(state) => state.active && state.enabled,
            Err(e) => return self.store_failed(chat_id, e),
        };
        if !active {
            return Decision::Ignore(Skip::TurnRefused);
        }
        self.continue_exchange(chat_id, last_text, now).await
    }

    async fn evaluate(&mut self, event: &InboundEvent, now: Instant) -> Decision {
        let chat_id = event.chat_id;
        if event.sender_is_self {
            return Decision::Ignore(Skip::OwnMessage);
        }
        let from_agent = event.from_agent();
        let trigger = self.rules.classify(event);

        if trigger == Trigger::Targeted && !from_agent {
            return self.targeted_reply(event, now);
        }

        let state = match self.store.snapshot(chat_id).await {
            Ok(state) => state,
            Err(e) => return self.store_failed(chat_id, e),
        };

        if state.enabled && !state.active && trigger == Trigger::Spontaneous && !from_agent {
            return self.open_exchange(event, now).await;
        }

        if state.active {
            return self.continue_exchange(chat_id, &event.text, now).await;
        }

        if from_agent {
            return Decision::Ignore(Skip::AgentMessage);
        }
        // quiet only stops exchanges; cooldown-gated replies carry on
        self.spontaneous_reply(event, now)
    }

    fn targeted_reply(&mut self, event: &InboundEvent, now: Instant) -> Decision {
        if !self.targeted.is_ready(event.chat_id, now) {
            return Decision::Ignore(Skip::TargetedTooSoon);
        }
        self.targeted.record(event.chat_id, now);
        tracing::info!(chat = event.chat_id, agent = %self.agent, "targeted reply");
        Decision::Reply(self.plan(event.chat_id, ReplyKind::Targeted, event.text.clone()))
    }

    async fn open_exchange(&mut self, event: &InboundEvent, now: Instant) -> Decision {
        let chat_id = event.chat_id;
        match self.store.try_start(chat_id, now).await {
            Ok(true) => {}
            Ok(false) => return Decision::Ignore(Skip::StartLost),
            Err(e) => return self.store_failed(chat_id, e),
        }
        self.emit(PersonaEvent::ExchangeStarted {
            chat_id,
            agent: self.agent.clone(),
        });

        if !self.dice.chance(self.persona.start_probability) {
            return Decision::Ignore(Skip::OpeningDeclined);
        }
        // lastTurnAt was just set to `now`, so the opening claim skips the gap
        let claim = self.claim(chat_id, now, DelayWindow::ZERO);
        let grant = match self.store.try_take_turn(claim).await {
            Ok(Some(grant)) => grant,
            Ok(None) => return Decision::Ignore(Skip::OpeningRefused),
            Err(e) => return self.store_failed(chat_id, e),
        };
        self.emit(PersonaEvent::TurnTaken {
            chat_id,
            agent: self.agent.clone(),
            turn: grant.turn,
            closed: grant.closed,
        });

        let prompt = render(&self.persona.opening_prompt, &event.text);
        let mut plan = self.plan(chat_id, ReplyKind::Opening { turn: grant.turn }, prompt);
        plan.delay = self.dice.within(self.persona.opening_delay_secs);
        Decision::Reply(plan)
    }

    async fn continue_exchange(&mut self, chat_id: ChatId, text: &str, now: Instant) -> Decision {
        if !self.dice.chance(self.exchange.continue_probability) {
            return Decision::Ignore(Skip::ContinueDeclined);
        }
        let claim = self.claim(chat_id, now, self.exchange.min_gap_secs);
        let grant = match self.store.try_take_turn(claim).await {
            Ok(Some(grant)) => grant,
            Ok(None) => return Decision::Ignore(Skip::TurnRefused),
            Err(e) => return self.store_failed(chat_id, e),
        };
        self.emit(PersonaEvent::TurnTaken {
            chat_id,
            agent: self.agent.clone(),
            turn: grant.turn,
            closed: grant.closed,
        });

        let mut closed = grant.closed;
        if !closed && self.dice.chance(self.exchange.end_probability) {
            match self.store.end(chat_id).await {
                Ok(ended) => {
                    closed = ended;
                    if ended {
                        self.emit(PersonaEvent::ExchangeEnded {
                            chat_id,
                            agent: self.agent.clone(),
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(chat = chat_id, agent = %self.agent, error = %e, "could not end exchange");
                }
            }
        }

        let template = if self.persona.turn_prompts.is_empty() {
            self.persona.opening_prompt.clone()
        } else {
            let i = self.dice.index(self.persona.turn_prompts.len());
            self.persona.turn_prompts[i].clone()
        };
        let kind = ReplyKind::Turn {
            turn: grant.turn,
            closed,
        };
        Decision::Reply(self.plan(chat_id, kind, render(&template, text)))
    }

    fn spontaneous_reply(&mut self, event: &InboundEvent, now: Instant) -> Decision {
        let chat_id = event.chat_id;
        if !self.rules.mentions_topic(&event.text) {
            return Decision::Ignore(Skip::OffTopic);
        }
        if !self.spontaneous.is_ready(chat_id, now) {
            return Decision::Ignore(Skip::CoolingDown);
        }
        if !self.dice.chance(self.persona.spontaneous_probability) {
            return Decision::Ignore(Skip::ChanceDeclined);
        }
        self.spontaneous.record(chat_id, now);
        tracing::info!(chat = chat_id, agent = %self.agent, "spontaneous reply");
        Decision::Reply(self.plan(chat_id, ReplyKind::Spontaneous, event.text.clone()))
    }

    fn claim(&self, chat_id: ChatId, now: Instant, min_gap: DelayWindow) -> TurnClaim {
        TurnClaim {
            chat_id,
            agent: self.agent.clone(),
            now,
            max_turns: self.exchange.max_turns,
            min_gap,
        }
    }

    fn plan(&mut self, chat_id: ChatId, kind: ReplyKind, prompt: String) -> ReplyPlan {
        let delay = self.dice.within(self.persona.typing_delay_secs);
        ReplyPlan {
            chat_id,
            kind,
            prompt,
            delay,
            fallback: self.pick_fallback(),
        }
    }

    fn pick_fallback(&mut self) -> String {
        let lines: Vec<&String> = self
            .persona
            .fallback_lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .collect();
        if lines.is_empty() {
            return String::new();
        }
        lines[self.dice.index(lines.len())].clone()
    }

    fn store_failed(&self, chat_id: ChatId, error: crate::error::Error) -> Decision {
        tracing::warn!(chat = chat_id, agent = %self.agent, error = %error, "conversation store unreachable");
        Decision::Ignore(Skip::StoreUnavailable)
    }

    fn emit(&self, event: PersonaEvent) {
        let _ = self.events.send(event);
    }
}

/// Fill `{text}` in a prompt template
fn render(template: &str, text: &str) -> String {
    template.replace("{text}", text.trim())
}
