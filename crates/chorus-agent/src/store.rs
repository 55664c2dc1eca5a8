//! Shared conversation state and the coordinator that owns it
//!
//! Every persona sees the same [`ConversationState`] per chat, but nobody
//! touches it directly. A single [`Coordinator`] task owns the [`Ledger`] and
//! applies requests one at a time, so each check-then-write below is atomic
//! with respect to every other persona. Personas talk to it through a
//! cloneable [`StoreHandle`].

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::DelayWindow;
use crate::dice::{Dice, RandomDice};
use crate::error::{Error, Result};
use crate::ids::{AgentId, ChatId};

/// Maximum number of queued requests before senders wait
const REQUEST_QUEUE_SIZE: usize = 256;

/// Point-in-time view of one chat's exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    /// Global kill switch, shared by all chats
    pub enabled: bool,
    pub chat_id: ChatId,
    pub active: bool,
    pub last_speaker: Option<AgentId>,
    pub turn_count: u32,
    pub last_turn_at: Option<Instant>,
    /// Identifier of the current (or last) exchange, for log correlation
    pub exchange_id: Option<Uuid>,
}

/// A request to take the next turn
#[derive(Debug, Clone)]
pub struct TurnClaim {
    pub chat_id: ChatId,
    pub agent: AgentId,
    pub now: Instant,
    pub max_turns: u32,
    /// The pause since the previous turn must reach a gap drawn from here
    pub min_gap: DelayWindow,
}

/// A successful claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnGrant {
    /// 1-based number of the granted turn
    pub turn: u32,
    /// The claim used the last turn and closed the exchange
    pub closed: bool,
    pub exchange_id: Uuid,
}

#[derive(Debug, Clone)]
struct ChatSlot {
    active: bool,
    last_speaker: Option<AgentId>,
    turn_count: u32,
    last_turn_at: Instant,
    exchange_id: Uuid,
}

/// The state machine behind the coordinator
///
/// Synchronous and single-owner; the coordinator task is the only owner in a
/// running system.
pub struct Ledger {
    enabled: bool,
    chats: HashMap<ChatId, ChatSlot>,
    dice: Box<dyn Dice>,
}

impl Ledger {
    pub fn new(dice: Box<dyn Dice>) -> Self {
        Self {
            enabled: true,
            chats: HashMap::new(),
            dice,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self, chat_id: ChatId) -> ConversationState {
        match self.chats.get(&chat_id) {
            Some(slot) => ConversationState {
                enabled: self.enabled,
                chat_id,
                active: slot.active,
                last_speaker: slot.last_speaker.clone(),
                turn_count: slot.turn_count,
                last_turn_at: Some(slot.last_turn_at),
                exchange_id: Some(slot.exchange_id),
            },
            None => ConversationState {
                enabled: self.enabled,
                chat_id,
                active: false,
                last_speaker: None,
                turn_count: 0,
                last_turn_at: None,
                exchange_id: None,
            },
        }
    }

    /// Open an exchange in `chat_id` unless one is running or the store is disabled
    pub fn try_start(&mut self, chat_id: ChatId, now: Instant) -> Option<Uuid> {
        if !self.enabled {
            return None;
        }
        if self.chats.get(&chat_id).is_some_and(|slot| slot.active) {
            return None;
        }
        let exchange_id = Uuid::new_v4();
        self.chats.insert(
            chat_id,
            ChatSlot {
                active: true,
                last_speaker: None,
                turn_count: 0,
                last_turn_at: now,
                exchange_id,
            },
        );
        Some(exchange_id)
    }

    /// Hand the next turn to `claim.agent` if every condition holds.
    ///
    /// A rejected claim leaves the state untouched.
    pub fn try_take_turn(&mut self, claim: &TurnClaim) -> Option<TurnGrant> {
        if !self.enabled {
            return None;
        }
        let slot = self.chats.get_mut(&claim.chat_id)?;
        if !slot.active
            || slot.turn_count >= claim.max_turns
            || slot.last_speaker.as_ref() == Some(&claim.agent)
        {
            return None;
        }
        let gap = self.dice.within(claim.min_gap);
        if claim.now.saturating_duration_since(slot.last_turn_at) < gap {
            return None;
        }

        slot.last_speaker = Some(claim.agent.clone());
        slot.turn_count += 1;
        slot.last_turn_at = claim.now;
        let closed = slot.turn_count >= claim.max_turns;
        if closed {
            slot.active = false;
        }
        Some(TurnGrant {
            turn: slot.turn_count,
            closed,
            exchange_id: slot.exchange_id,
        })
    }

    /// Close the exchange in `chat_id`; returns whether one was running
    pub fn end(&mut self, chat_id: ChatId) -> bool {
        match self.chats.get_mut(&chat_id) {
            Some(slot) if slot.active => {
                slot.active = false;
                true
            }
            _ => false,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

enum Request {
    TryStart {
        chat_id: ChatId,
        now: Instant,
        reply: oneshot::Sender<Option<Uuid>>,
    },
    TryTakeTurn {
        claim: TurnClaim,
        reply: oneshot::Sender<Option<TurnGrant>>,
    },
    End {
        chat_id: ChatId,
        reply: oneshot::Sender<bool>,
    },
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        chat_id: ChatId,
        reply: oneshot::Sender<ConversationState>,
    },
    Shutdown,
}

/// Owner of the shared [`Ledger`]
pub struct Coordinator {
    ledger: Ledger,
    requests: mpsc::Receiver<Request>,
}

impl Coordinator {
    /// Spawn a coordinator with real randomness
    pub fn spawn() -> StoreHandle {
        Self::spawn_with_dice(Box::new(RandomDice::new()))
    }

    /// Spawn a coordinator whose gap sampling uses `dice`
    pub fn spawn_with_dice(dice: Box<dyn Dice>) -> StoreHandle {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let coordinator = Coordinator {
            ledger: Ledger::new(dice),
            requests: rx,
        };
        tokio::spawn(coordinator.run());
        StoreHandle { tx }
    }

    async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            match request {
                Request::TryStart {
                    chat_id,
                    now,
                    reply,
                } => {
                    let started = self.ledger.try_start(chat_id, now);
                    if let Some(exchange_id) = started {
                        tracing::info!(chat = chat_id, exchange = %exchange_id, "exchange opened");
                    }
                    let _ = reply.send(started);
                }
                Request::TryTakeTurn { claim, reply } => {
                    let grant = self.ledger.try_take_turn(&claim);
                    if let Some(grant) = grant {
                        tracing::info!(
                            chat = claim.chat_id,
                            agent = %claim.agent,
                            turn = grant.turn,
                            closed = grant.closed,
                            "turn granted"
                        );
                    }
                    let _ = reply.send(grant);
                }
                Request::End { chat_id, reply } => {
                    let ended = self.ledger.end(chat_id);
                    if ended {
                        tracing::info!(chat = chat_id, "exchange ended");
                    }
                    let _ = reply.send(ended);
                }
                Request::SetEnabled { enabled, reply } => {
                    if self.ledger.is_enabled() != enabled {
                        tracing::info!(enabled, "exchanges toggled");
                    }
                    self.ledger.set_enabled(enabled);
                    let _ = reply.send(());
                }
                Request::Snapshot { chat_id, reply } => {
                    let _ = reply.send(self.ledger.state(chat_id));
                }
                Request::Shutdown => break,
            }
        }
        tracing::debug!("coordinator stopped");
    }
}

/// Cloneable access to the coordinator
///
/// Every call fails with [`Error::StoreUnavailable`] once the coordinator
/// has stopped.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<Request>,
}

impl StoreHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::StoreUnavailable)?;
        response.await.map_err(|_| Error::StoreUnavailable)
    }

    /// Open an exchange; exactly one of any set of racing callers wins
    pub async fn try_start(&self, chat_id: ChatId, now: Instant) -> Result<bool> {
        self.try_start_exchange(chat_id, now)
            .await
            .map(|id| id.is_some())
    }

    /// Like [`StoreHandle::try_start`], returning the new exchange id
    pub async fn try_start_exchange(&self, chat_id: ChatId, now: Instant) -> Result<Option<Uuid>> {
        self.request(|reply| Request::TryStart {
            chat_id,
            now,
            reply,
        })
        .await
    }

    pub async fn try_take_turn(&self, claim: TurnClaim) -> Result<Option<TurnGrant>> {
        self.request(|reply| Request::TryTakeTurn { claim, reply })
            .await
    }

    pub async fn end(&self, chat_id: ChatId) -> Result<bool> {
        self.request(|reply| Request::End { chat_id, reply }).await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Request::SetEnabled { enabled, reply })
            .await
    }

    pub async fn snapshot(&self, chat_id: ChatId) -> Result<ConversationState> {
        self.request(|reply| Request::Snapshot { chat_id, reply })
            .await
    }

    /// Stop the coordinator; requests already queued ahead of this are served
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::FixedDice;
    use std::time::Duration;

    const GAP: DelayWindow = DelayWindow::new(20.0, 60.0);

    fn ledger() -> Ledger {
        // draw 0.0: every sampled gap is the window's low end (20s)
        Ledger::new(Box::new(FixedDice::always()))
    }

    fn claim(agent: &str, now: Instant) -> TurnClaim {
        TurnClaim {
            chat_id: 1,
            agent: AgentId::new(agent),
            now,
            max_turns: 6,
            min_gap: GAP,
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_start_resets_state() {
        let t0 = Instant::now();
        let mut ledger = ledger();
        assert!(ledger.try_start(1, t0).is_some());

        let state = ledger.state(1);
        assert!(state.enabled && state.active);
        assert_eq!(state.turn_count, 0);
        assert_eq!(state.last_speaker, None);
        assert_eq!(state.last_turn_at, Some(t0));
    }

    #[test]
    fn test_second_start_loses() {
        let t0 = Instant::now();
        let mut ledger = ledger();
        assert!(ledger.try_start(1, t0).is_some());
        assert!(ledger.try_start(1, t0).is_none());
        // other chats are independent
        assert!(ledger.try_start(2, t0).is_some());
    }

    #[test]
    fn test_start_refused_when_disabled() {
        let mut ledger = ledger();
        ledger.set_enabled(false);
        assert!(ledger.try_start(1, Instant::now()).is_none());
        assert!(!ledger.state(1).active);
    }

    #[test]
    fn test_turn_needs_active_exchange() {
        let mut ledger = ledger();
        assert!(ledger.try_take_turn(&claim("a", Instant::now())).is_none());
    }

    #[test]
    fn test_turn_respects_min_gap() {
        let t0 = Instant::now();
        let mut ledger = ledger();
        ledger.try_start(1, t0);

        assert!(ledger.try_take_turn(&claim("a", t0 + secs(19))).is_none());
        assert_eq!(ledger.state(1).turn_count, 0);

        let grant = ledger.try_take_turn(&claim("a", t0 + secs(20))).unwrap();
        assert_eq!(grant.turn, 1);
        assert!(!grant.closed);
    }

    #[test]
    fn test_zero_gap_claim_is_immediate() {
        let t0 = Instant::now();
        let mut ledger = ledger();
        ledger.try_start(1, t0);
        let opening = TurnClaim {
            min_gap: DelayWindow::ZERO,
            ..claim("a", t0)
        };
        assert!(ledger.try_take_turn(&opening).is_some());
    }

    #[test]
    fn test_no_self_succession() {
        let t0 = Instant::now();
        let mut ledger = ledger();
        ledger.try_start(1, t0);
        ledger.try_take_turn(&claim("a", t0 + secs(30))).unwrap();

        assert!(ledger.try_take_turn(&claim("a", t0 + secs(90))).is_none());
        let state = ledger.state(1);
        assert_eq!(state.turn_count, 1);
        assert_eq!(state.last_speaker, Some(AgentId::new("a")));

        assert!(ledger.try_take_turn(&claim("b", t0 + secs(90))).is_some());
    }

    fn ledger_at_turn(count: u32, t0: Instant) -> Ledger {
        let mut ledger = ledger();
        ledger.try_start(1, t0);
        let mut now = t0;
        for i in 0..count {
            now += secs(30);
            let agent = if i % 2 == 0 { "b" } else { "a" };
            ledger.try_take_turn(&claim(agent, now)).unwrap();
        }
        ledger
    }

    #[test]
    fn test_claim_below_limit() {
        // active, turnCount=4, maxTurns=6, lastSpeaker=a
        let t0 = Instant::now();
        let mut ledger = ledger_at_turn(4, t0);
        assert_eq!(ledger.state(1).last_speaker, Some(AgentId::new("a")));

        let grant = ledger.try_take_turn(&claim("b", t0 + secs(200))).unwrap();
        assert_eq!(grant.turn, 5);
        assert!(!grant.closed);
        let state = ledger.state(1);
        assert!(state.active);
        assert_eq!(state.turn_count, 5);
        assert_eq!(state.last_speaker, Some(AgentId::new("b")));
    }

    #[test]
    fn test_final_claim_closes_exchange() {
        let t0 = Instant::now();
        let mut ledger = ledger_at_turn(5, t0);
        assert_eq!(ledger.state(1).last_speaker, Some(AgentId::new("b")));

        let grant = ledger.try_take_turn(&claim("a", t0 + secs(300))).unwrap();
        assert_eq!(grant.turn, 6);
        assert!(grant.closed);
        let state = ledger.state(1);
        assert!(!state.active);
        assert_eq!(state.turn_count, 6);

        assert!(ledger.try_take_turn(&claim("b", t0 + secs(600))).is_none());
        assert_eq!(ledger.state(1).turn_count, 6);
    }

    #[test]
    fn test_disable_blocks_turns() {
        let t0 = Instant::now();
        let mut ledger = ledger();
        ledger.try_start(1, t0);
        ledger.set_enabled(false);
        assert!(ledger.try_take_turn(&claim("a", t0 + secs(90))).is_none());

        ledger.set_enabled(true);
        assert!(ledger.try_take_turn(&claim("a", t0 + secs(90))).is_some());
    }

    #[test]
    fn test_end_then_restart() {
        let t0 = Instant::now();
        let mut ledger = ledger_at_turn(3, t0);
        assert!(ledger.end(1));
        assert!(!ledger.end(1));
        assert!(!ledger.state(1).active);

        assert!(ledger.try_start(1, t0 + secs(500)).is_some());
        assert_eq!(ledger.state(1).turn_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_starts_have_one_winner() {
        let store = Coordinator::spawn_with_dice(Box::new(FixedDice::always()));
        let now = Instant::now();

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.try_start(42, now).await.unwrap() })
            })
            .collect();
        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(store.snapshot(42).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Coordinator::spawn_with_dice(Box::new(FixedDice::always()));
        let t0 = Instant::now();
        store.try_start(42, t0).await.unwrap();

        let now = t0 + secs(30);
        let claims: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|agent| {
                let store = store.clone();
                let claim = TurnClaim {
                    chat_id: 42,
                    ..claim(agent, now)
                };
                tokio::spawn(async move { store.try_take_turn(claim).await.unwrap() })
            })
            .collect();
        let mut grants = Vec::new();
        for claim in claims {
            if let Some(grant) = claim.await.unwrap() {
                grants.push(grant);
            }
        }
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].turn, 1);
        assert_eq!(store.snapshot(42).await.unwrap().turn_count, 1);
    }

    #[tokio::test]
    async fn test_handle_fails_closed_after_shutdown() {
        let store = Coordinator::spawn();
        store.shutdown().await;
        // let the coordinator observe the shutdown and drop its receiver
        tokio::task::yield_now().await;

        let err = store.try_start(1, Instant::now()).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable));
        assert!(matches!(
            store.snapshot(1).await,
            Err(Error::StoreUnavailable)
        ));
    }
}
