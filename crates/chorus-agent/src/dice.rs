//! Injectable randomness
//!
//! Every probabilistic choice (start, continue, end, spontaneous reply,
//! delays, gaps, prompt picks) goes through [`Dice`] so tests can pin the
//! outcome instead of relying on statistics.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::config::DelayWindow;

/// Source of random decisions
pub trait Dice: Send + Sync {
    /// `true` with probability `p`
    fn chance(&mut self, p: f64) -> bool;

    /// A duration drawn uniformly from `window`
    fn within(&mut self, window: DelayWindow) -> Duration;

    /// An index drawn uniformly from `0..len`; `len` must be non-zero
    fn index(&mut self, len: usize) -> usize;
}

/// Dice backed by a real random number generator
pub struct RandomDice {
    rng: StdRng,
}

impl RandomDice {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible dice, for demos and soak tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomDice {
    fn default() -> Self {
        Self::new()
    }
}

impl Dice for RandomDice {
    fn chance(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.rng.random_bool(p)
    }

    fn within(&mut self, window: DelayWindow) -> Duration {
        let low = window.low().as_secs_f64();
        let high = window.high().as_secs_f64();
        if high <= low {
            return window.low();
        }
        Duration::from_secs_f64(self.rng.random_range(low..=high))
    }

    fn index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        self.rng.random_range(0..len)
    }
}

/// Dice that always "rolls" the same uniform value in `[0, 1]`
///
/// `chance(p)` passes iff `draw < p`, windows yield the point at `draw`,
/// and indexes scale the same way. `FixedDice::always()` passes every gate
/// with a non-zero probability and picks minimal delays.
#[derive(Debug, Clone, Copy)]
pub struct FixedDice {
    draw: f64,
}

impl FixedDice {
    pub fn new(draw: f64) -> Self {
        Self {
            draw: draw.clamp(0.0, 1.0),
        }
    }

    pub fn always() -> Self {
        Self::new(0.0)
    }

    pub fn never() -> Self {
        Self::new(1.0)
    }
}

impl Dice for FixedDice {
    fn chance(&mut self, p: f64) -> bool {
        self.draw < p
    }

    fn within(&mut self, window: DelayWindow) -> Duration {
        window.at(self.draw)
    }

    fn index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        ((self.draw * len as f64) as usize).min(len - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_always_and_never() {
        let mut always = FixedDice::always();
        assert!(always.chance(0.01));
        assert!(!always.chance(0.0));

        let mut never = FixedDice::never();
        assert!(!never.chance(0.99));
        assert!(!never.chance(1.0));
    }

    #[test]
    fn test_fixed_threshold() {
        let mut dice = FixedDice::new(0.25);
        assert!(dice.chance(0.5));
        assert!(!dice.chance(0.25));
        assert_eq!(dice.index(10), 2);
        assert_eq!(
            dice.within(DelayWindow::new(10.0, 20.0)),
            Duration::from_millis(12_500)
        );
    }

    #[test]
    fn test_random_stays_in_window() {
        let mut dice = RandomDice::seeded(7);
        let window = DelayWindow::new(20.0, 60.0);
        for _ in 0..200 {
            let d = dice.within(window);
            assert!(d >= Duration::from_secs(20) && d <= Duration::from_secs(60));
        }
        assert_eq!(dice.within(DelayWindow::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_random_extremes_are_certain() {
        let mut dice = RandomDice::seeded(1);
        for _ in 0..50 {
            assert!(dice.chance(1.0));
            assert!(!dice.chance(0.0));
        }
        assert_eq!(dice.index(1), 0);
    }
}
