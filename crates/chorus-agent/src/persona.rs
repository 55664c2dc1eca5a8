//! Persona runtime
//!
//! One [`Persona`] per configured character. It owns its histories, asks its
//! [`Scheduler`] what to do with every inbound event, and carries out the
//! resulting replies: typing indicator, delay, bounded model call, post.

use chorus_ai::{ChatModel, CompletionOptions, Message};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{ExchangeConfig, ModelSettings, PersonaConfig};
use crate::dice::{Dice, RandomDice};
use crate::error::{Error, Result};
use crate::events::PersonaEvent;
use crate::history::{AgentHistory, Histories};
use crate::ids::{AgentId, ChatId};
use crate::scheduler::{Decision, ReplyPlan, Scheduler};
use crate::store::StoreHandle;
use crate::transport::{ChatEvent, ChatTransport, Command, InboundEvent};

const EVENT_CAPACITY: usize = 256;

/// Everything needed to build a persona
#[derive(Debug, Clone, Default)]
pub struct PersonaSettings {
    pub persona: PersonaConfig,
    pub exchange: ExchangeConfig,
    pub model: ModelSettings,
}

/// A running persona
pub struct Persona {
    scheduler: Scheduler,
    histories: Histories,
    model: Arc<dyn ChatModel>,
    transport: Arc<dyn ChatTransport>,
    options: CompletionOptions,
    model_timeout: Duration,
    nudge_interval: Option<Duration>,
    /// Latest text seen per chat, used when nudging
    last_seen: HashMap<ChatId, String>,
    event_tx: broadcast::Sender<PersonaEvent>,
}

impl Persona {
    /// Create a persona with real randomness
    pub fn new(
        settings: PersonaSettings,
        store: StoreHandle,
        model: Arc<dyn ChatModel>,
        transport: Arc<dyn ChatTransport>,
    ) -> Result<Self> {
        Self::with_dice(settings, store, model, transport, Box::new(RandomDice::new()))
    }

    /// Create a persona whose decisions are drawn from `dice`
    pub fn with_dice(
        settings: PersonaSettings,
        store: StoreHandle,
        model: Arc<dyn ChatModel>,
        transport: Arc<dyn ChatTransport>,
        dice: Box<dyn Dice>,
    ) -> Result<Self> {
        let PersonaSettings {
            persona,
            exchange,
            model: model_settings,
        } = settings;
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let histories = Histories::new(persona.system_prompt.clone(), persona.history_limit);
        let nudge_interval = exchange.nudge_interval();
        let scheduler = Scheduler::new(persona, exchange, store, dice, event_tx.clone())?;
        Ok(Self {
            scheduler,
            histories,
            model,
            transport,
            options: model_settings.options(),
            model_timeout: model_settings.timeout(),
            nudge_interval,
            last_seen: HashMap::new(),
            event_tx,
        })
    }

    pub fn id(&self) -> &AgentId {
        self.scheduler.agent()
    }

    pub fn config(&self) -> &PersonaConfig {
        self.scheduler.persona()
    }

    /// Subscribe to persona events
    pub fn subscribe(&self) -> broadcast::Receiver<PersonaEvent> {
        self.event_tx.subscribe()
    }

    /// This persona's history in `chat_id`, if it has spoken or listened there
    pub fn history(&self, chat_id: ChatId) -> Option<&AgentHistory> {
        self.histories.get(chat_id)
    }

    /// Process one inbound event to completion, including any reply
    pub async fn handle(&mut self, event: ChatEvent) -> Result<()> {
        match event {
            ChatEvent::Message(message) => self.on_message(message).await,
            ChatEvent::Command { chat_id, command } => self.on_command(chat_id, command).await,
        }
    }

    /// Give every chat with an exchange a chance to move on without new messages
    pub async fn nudge(&mut self) -> Result<()> {
        let chats: Vec<(ChatId, String)> = self
            .last_seen
            .iter()
            .map(|(chat, text)| (*chat, text.clone()))
            .collect();
        for (chat_id, text) in chats {
            let decision = self
                .scheduler
                .decide_nudge(chat_id, &text, Instant::now())
                .await;
            if let Decision::Reply(plan) = decision {
                self.reply(plan).await?;
            }
        }
        Ok(())
    }

    /// Serve `inbox` until it closes or `cancel` fires.
    ///
    /// Errors from individual events are logged and do not stop the loop.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<ChatEvent>, cancel: CancellationToken) {
        let mut nudge = self.nudge_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        tracing::info!(agent = %self.id(), "persona started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = inbox.recv() => {
                    let Some(event) = event else { break };
                    let chat_id = event.chat_id();
                    if let Err(e) = self.handle(event).await {
                        tracing::error!(chat = chat_id, agent = %self.id(), error = %e, "failed to handle event");
                    }
                }
                _ = tick(&mut nudge) => {
                    if let Err(e) = self.nudge().await {
                        tracing::error!(agent = %self.id(), error = %e, "nudge failed");
                    }
                }
            }
        }
        tracing::info!(agent = %self.id(), "persona stopped");
    }

    async fn on_message(&mut self, message: InboundEvent) -> Result<()> {
        if !message.sender_is_self {
            self.last_seen.insert(message.chat_id, message.text.clone());
        }
        match self.scheduler.decide(&message, Instant::now()).await {
            Decision::Reply(plan) => self.reply(plan).await,
            Decision::Ignore(_) => Ok(()),
        }
    }

    async fn on_command(&mut self, chat_id: ChatId, command: Command) -> Result<()> {
        let agent = self.id().clone();
        tracing::info!(chat = chat_id, agent = %agent, command = command.name(), "command");
        let ack = match command {
            Command::Quiet => {
                let store = self.scheduler.store().clone();
                match store.end(chat_id).await {
                    Ok(true) => self.emit(PersonaEvent::ExchangeEnded {
                        chat_id,
                        agent: agent.clone(),
                    }),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(chat = chat_id, agent = %agent, error = %e, "could not end exchange"),
                }
                if let Err(e) = store.set_enabled(false).await {
                    tracing::warn!(chat = chat_id, agent = %agent, error = %e, "could not disable exchanges");
                }
                self.config().quiet_reply.clone()
            }
            Command::Resume => {
                if let Err(e) = self.scheduler.store().set_enabled(true).await {
                    tracing::warn!(chat = chat_id, agent = %agent, error = %e, "could not enable exchanges");
                }
                self.config().resume_reply.clone()
            }
            Command::ResetHistory => {
                if self.histories.reset(chat_id) {
                    tracing::debug!(chat = chat_id, agent = %agent, "history cleared");
                }
                None
            }
        };

        match ack.filter(|line| !line.trim().is_empty()) {
            Some(line) => self.transport.send_text(chat_id, &line).await,
            None => Ok(()),
        }
    }

    async fn reply(&mut self, plan: ReplyPlan) -> Result<()> {
        let chat_id = plan.chat_id;
        let agent = self.id().clone();

        if let Err(e) = self.transport.send_typing(chat_id).await {
            tracing::debug!(chat = chat_id, agent = %agent, error = %e, "typing indicator failed");
        }
        tokio::time::sleep(plan.delay).await;

        let history = self.histories.chat(chat_id);
        history.push_user(plan.prompt.clone());
        let messages = history.messages();

        let (text, fell_back) = match self.generate(&messages).await {
            Ok(text) => (text, false),
            Err(e) if e.is_model_unavailable() => {
                tracing::warn!(
                    chat = chat_id,
                    agent = %agent,
                    quota = e.is_quota(),
                    error = %e,
                    "model unavailable, using fallback"
                );
                self.emit(PersonaEvent::FallbackUsed {
                    chat_id,
                    agent: agent.clone(),
                    error: e.to_string(),
                });
                (plan.fallback.clone(), true)
            }
            Err(e) => return Err(e),
        };
        if text.trim().is_empty() {
            return Ok(());
        }
        // filler lines stay out of the model's context
        if !fell_back {
            self.histories.chat(chat_id).push_assistant(text.clone());
        }

        self.transport.send_text(chat_id, &text).await?;
        tracing::info!(chat = chat_id, agent = %agent, kind = ?plan.kind, "replied");
        self.emit(PersonaEvent::Replied {
            chat_id,
            agent,
            kind: plan.kind,
            text,
        });
        Ok(())
    }

    async fn generate(&self, messages: &[Message]) -> Result<String> {
        match tokio::time::timeout(self.model_timeout, self.model.complete(messages, &self.options))
            .await
        {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(Error::ModelTimeout(self.model_timeout)),
        }
    }

    fn emit(&self, event: PersonaEvent) {
        let _ = self.event_tx.send(event);
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
