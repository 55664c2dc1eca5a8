//! Configuration file support

use anyhow::{Context, bail};
use chorus_agent::{ExchangeConfig, ModelSettings, PersonaConfig, PersonaSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable consulted when the file has no API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration for chorus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelSection,
    pub exchange: ExchangeConfig,
    pub personas: Vec<PersonaConfig>,
}

/// The `[model]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    #[serde(flatten)]
    pub settings: ModelSettings,
    /// OpenAI-compatible endpoint; the provider default when unset
    pub base_url: Option<String>,
    /// API key (alternative to the environment variable)
    pub api_key: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chorus")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CHORUS_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load and validate the config at `path`
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            bail!(
                "no config at {} (create one with `chorus --init-config`)",
                path.display()
            );
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate config text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.personas.is_empty() {
            bail!("at least one [[personas]] entry is required");
        }
        chorus_agent::config::validate_cast(&self.personas, &self.exchange)?;
        Ok(())
    }

    /// Write the annotated example config to `path` unless a file is already there
    pub fn init(path: &Path) -> std::io::Result<PathBuf> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())?;
        Ok(path.to_path_buf())
    }

    /// API key from the file, then the environment
    pub fn api_key(&self) -> Option<String> {
        let provided = self
            .model
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty());
        chorus_ai::providers::get_api_key(provided, API_KEY_ENV).ok()
    }

    /// One settings bundle per persona
    pub fn persona_settings(&self) -> Vec<PersonaSettings> {
        self.personas
            .iter()
            .map(|persona| PersonaSettings {
                persona: persona.clone(),
                exchange: self.exchange.clone(),
                model: self.model.settings.clone(),
            })
            .collect()
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# chorus configuration file
# Place at ~/.config/chorus/config.toml (Linux/Mac) or %APPDATA%\chorus\config.toml (Windows)

[model]
model = "gpt-4o-mini"
# Any OpenAI-compatible endpoint works (Groq, OpenRouter, Ollama, ...)
# base_url = "http://localhost:11434/v1"
# api_key = "sk-..."   # defaults to $OPENAI_API_KEY
max_tokens = 70
temperature = 0.9
timeout_secs = 30

[exchange]
# An exchange closes after this many persona turns
max_turns = 6
# Pause between turns, drawn fresh from [low, high] seconds for every claim
min_gap_secs = [20, 60]
# Chance of winding an exchange down after any turn
end_probability = 0.15
# Chance that an eligible persona competes for the next turn
continue_probability = 0.8
# Re-check running exchanges this often even if nobody posts
nudge_interval_secs = 5

[[personas]]
id = "rook"
display_name = "Rook"
handle = "rook_bot"
system_prompt = "You are Rook, a calm chess club regular. Answer in one or two short sentences."
keywords = ["chess", "opening", "endgame", "tournament"]
opening_prompt = "A club member asked: \"{text}\". Share a short opinion."
turn_prompts = [
    "Respond briefly to: \"{text}\"",
    "Add one practical tip related to: \"{text}\"",
]
fallback_lines = ["Sorry, I lost my train of thought. Could you repeat that?"]
quiet_reply = "Understood, we'll keep it down."
resume_reply = "Happy to chat again."

[[personas]]
id = "knight"
display_name = "Knight"
handle = "knight_bot"
system_prompt = "You are Knight, an enthusiastic chess club member. Keep replies short and friendly."
keywords = ["chess", "puzzle", "blitz", "rating"]
start_probability = 0.4
typing_delay_secs = [4, 9]
fallback_lines = ["Hmm, my connection dropped. What was the question?"]
"#
}
