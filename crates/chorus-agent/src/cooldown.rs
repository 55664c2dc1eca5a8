//! Per-chat cooldown windows.
//!
//! A tracker belongs to exactly one persona, so it needs no locking.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::ids::ChatId;

/// Remembers when a persona last spoke unprompted in each chat
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window: Duration,
    last: HashMap<ChatId, Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// Time since the last recorded reply in `chat`, if there was one
    pub fn elapsed(&self, chat: ChatId, now: Instant) -> Option<Duration> {
        self.last
            .get(&chat)
            .map(|last| now.saturating_duration_since(*last))
    }

    /// Whether the cooldown for `chat` has run out
    pub fn is_ready(&self, chat: ChatId, now: Instant) -> bool {
        self.elapsed(chat, now)
            .is_none_or(|elapsed| elapsed >= self.window)
    }

    pub fn record(&mut self, chat: ChatId, now: Instant) {
        self.last.insert(chat, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reply_is_free() {
        let tracker = CooldownTracker::new(Duration::from_secs(300));
        assert!(tracker.is_ready(7, Instant::now()));
        assert_eq!(tracker.elapsed(7, Instant::now()), None);
    }

    #[test]
    fn test_blocks_within_window() {
        let t0 = Instant::now();
        let mut tracker = CooldownTracker::new(Duration::from_secs(300));
        tracker.record(7, t0);

        assert!(!tracker.is_ready(7, t0 + Duration::from_secs(1)));
        assert!(!tracker.is_ready(7, t0 + Duration::from_secs(299)));
        assert!(tracker.is_ready(7, t0 + Duration::from_secs(300)));
    }

    #[test]
    fn test_chats_are_independent() {
        let t0 = Instant::now();
        let mut tracker = CooldownTracker::new(Duration::from_secs(300));
        tracker.record(7, t0);
        assert!(tracker.is_ready(8, t0 + Duration::from_secs(1)));
        assert!(!tracker.is_ready(7, t0 + Duration::from_secs(1)));
    }
}
