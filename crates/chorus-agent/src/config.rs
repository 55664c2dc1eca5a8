//! Immutable configuration handed to each persona at construction

use chorus_ai::CompletionOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ids::AgentId;

/// Longest delay, gap or nudge period a config may ask for (one day)
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

/// A `[low, high]` window in seconds that delays and gaps are sampled from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct DelayWindow {
    pub low_secs: f64,
    pub high_secs: f64,
}

impl DelayWindow {
    pub const ZERO: DelayWindow = DelayWindow::new(0.0, 0.0);

    pub const fn new(low_secs: f64, high_secs: f64) -> Self {
        Self {
            low_secs,
            high_secs,
        }
    }

    pub fn low(&self) -> Duration {
        Duration::from_secs_f64(self.low_secs.max(0.0))
    }

    pub fn high(&self) -> Duration {
        Duration::from_secs_f64(self.high_secs.max(self.low_secs).max(0.0))
    }

    /// Point inside the window at `fraction` (clamped to 0..=1) of its width
    pub fn at(&self, fraction: f64) -> Duration {
        let fraction = fraction.clamp(0.0, 1.0);
        let low = self.low().as_secs_f64();
        let high = self.high().as_secs_f64();
        Duration::from_secs_f64(low + (high - low) * fraction)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let finite = self.low_secs.is_finite() && self.high_secs.is_finite();
        if !finite
            || self.low_secs < 0.0
            || self.low_secs > self.high_secs
            || self.high_secs > MAX_WAIT_SECS as f64
        {
            return Err(Error::InvalidConfig(format!(
                "{} must be [low, high] with 0 <= low <= high <= {}, got [{}, {}]",
                name, MAX_WAIT_SECS, self.low_secs, self.high_secs
            )));
        }
        Ok(())
    }
}

impl From<[f64; 2]> for DelayWindow {
    fn from([low, high]: [f64; 2]) -> Self {
        Self::new(low, high)
    }
}

impl From<DelayWindow> for [f64; 2] {
    fn from(window: DelayWindow) -> Self {
        [window.low_secs, window.high_secs]
    }
}

/// Rules deciding which messages count as on-topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Topic keywords, matched as case-insensitive substrings
    pub keywords: Vec<String>,
    /// Words that mark a question when they open a message
    pub question_words: Vec<String>,
    /// Whether starting an exchange also needs a question marker
    pub require_question_mark: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            question_words: ["what", "how", "why", "where", "when", "which", "who", "anyone"]
                .into_iter()
                .map(String::from)
                .collect(),
            require_question_mark: true,
        }
    }
}

/// Settings shared by every persona taking part in staged exchanges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Turns after which an exchange closes
    pub max_turns: u32,
    /// Minimum pause between two turns, sampled fresh for every claim
    pub min_gap_secs: DelayWindow,
    /// Chance that an exchange is wound down right after a turn
    pub end_probability: f64,
    /// Chance that an eligible persona competes for the next turn at all
    pub continue_probability: f64,
    /// How often a persona re-checks active exchanges without new messages
    pub nudge_interval_secs: Option<u64>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_turns: 6,
            min_gap_secs: DelayWindow::new(20.0, 60.0),
            end_probability: 0.15,
            continue_probability: 0.8,
            nudge_interval_secs: None,
        }
    }
}

impl ExchangeConfig {
    pub fn nudge_interval(&self) -> Option<Duration> {
        self.nudge_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(Error::InvalidConfig("max_turns must be at least 1".into()));
        }
        self.min_gap_secs.validate("min_gap_secs")?;
        if let Some(secs) = self.nudge_interval_secs.filter(|secs| *secs > MAX_WAIT_SECS) {
            return Err(Error::InvalidConfig(format!(
                "nudge_interval_secs must be at most {}, got {}",
                MAX_WAIT_SECS, secs
            )));
        }
        check_probability("end_probability", self.end_probability)?;
        check_probability("continue_probability", self.continue_probability)
    }
}

/// Parameters for every model call a persona makes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound on a single completion
    pub timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 70,
            temperature: 0.9,
            timeout_secs: 30,
        }
    }
}

impl ModelSettings {
    pub fn options(&self) -> CompletionOptions {
        CompletionOptions::new(self.model.clone())
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Everything that distinguishes one persona from another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub id: AgentId,
    pub display_name: String,
    /// Username without `@`; mentions of it make a message targeted
    pub handle: Option<String>,
    pub system_prompt: String,
    #[serde(flatten)]
    pub triggers: TriggerConfig,
    /// Chance of taking the opening turn after winning a start
    pub start_probability: f64,
    /// Chance of answering an on-topic message outside any exchange
    pub spontaneous_probability: f64,
    pub spontaneous_cooldown_secs: u64,
    pub targeted_min_gap_secs: u64,
    pub typing_delay_secs: DelayWindow,
    pub opening_delay_secs: DelayWindow,
    /// Non-system history entries kept per chat
    pub history_limit: usize,
    /// Prompt for the opening turn; `{text}` is replaced by the trigger message
    pub opening_prompt: String,
    /// Prompts for later turns, one drawn per turn; `{text}` is supported
    pub turn_prompts: Vec<String>,
    /// Lines sent when the model is unavailable
    pub fallback_lines: Vec<String>,
    /// Acknowledgement for the quiet command, if any
    pub quiet_reply: Option<String>,
    /// Acknowledgement for the resume command, if any
    pub resume_reply: Option<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            id: AgentId::new("persona"),
            display_name: "Persona".to_string(),
            handle: None,
            system_prompt: "You are a friendly member of a group chat. Keep replies short."
                .to_string(),
            triggers: TriggerConfig::default(),
            start_probability: 0.5,
            spontaneous_probability: 0.25,
            spontaneous_cooldown_secs: 300,
            targeted_min_gap_secs: 30,
            typing_delay_secs: DelayWindow::new(5.0, 10.0),
            opening_delay_secs: DelayWindow::new(4.0, 8.0),
            history_limit: 10,
            opening_prompt: "Someone asked: \"{text}\". What do you think?".to_string(),
            turn_prompts: vec![
                "Add a short thought to the discussion about: \"{text}\"".to_string(),
                "React briefly to the latest message: \"{text}\"".to_string(),
            ],
            fallback_lines: vec!["Sorry, I lost my train of thought. Say that again?".to_string()],
            quiet_reply: None,
            resume_reply: None,
        }
    }
}

impl PersonaConfig {
    pub fn new(id: impl Into<AgentId>) -> Self {
        let id = id.into();
        Self {
            display_name: id.to_string(),
            id,
            ..Default::default()
        }
    }

    pub fn spontaneous_cooldown(&self) -> Duration {
        Duration::from_secs(self.spontaneous_cooldown_secs)
    }

    pub fn targeted_min_gap(&self) -> Duration {
        Duration::from_secs(self.targeted_min_gap_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(Error::InvalidConfig("persona id must not be empty".into()));
        }
        check_probability("start_probability", self.start_probability)?;
        check_probability("spontaneous_probability", self.spontaneous_probability)?;
        self.typing_delay_secs.validate("typing_delay_secs")?;
        self.opening_delay_secs.validate("opening_delay_secs")?;
        if self.fallback_lines.iter().all(|l| l.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "persona '{}' needs at least one fallback line",
                self.id
            )));
        }
        Ok(())
    }
}

/// Validate a whole cast: each persona, the shared exchange rules, unique ids
pub fn validate_cast(personas: &[PersonaConfig], exchange: &ExchangeConfig) -> Result<()> {
    exchange.validate()?;
    let mut seen = HashSet::new();
    for persona in personas {
        persona.validate()?;
        if !seen.insert(persona.id.clone()) {
            return Err(Error::InvalidConfig(format!(
                "duplicate persona id '{}'",
                persona.id
            )));
        }
    }
    Ok(())
}

fn check_probability(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::InvalidConfig(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}
