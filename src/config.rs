//! Configuration types for streaming and speech.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::llm::request::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P};
use crate::llm::session::{DEFAULT_ERROR_BODY_LIMIT, DEFAULT_RATE_LIMIT_MESSAGE};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Completion endpoint settings.
    pub llm: LlmConfig,
    /// Speech settings.
    pub tts: TtsConfig,
}

/// Completion endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API base URL (an OpenAI-compatible `/v1` root).
    pub base_url: String,
    /// API key. `None` falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// Model id.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Optional system prompt prepended to every conversation.
    pub system_prompt: Option<String>,
    /// Message shown for HTTP 429 regardless of body.
    pub rate_limit_message: String,
    /// Non-JSON error bodies shorter than this (in chars) are shown verbatim.
    pub error_body_limit: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_owned(),
            api_key: None,
            model: "gpt-4o-mini".to_owned(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            system_prompt: None,
            rate_limit_message: DEFAULT_RATE_LIMIT_MESSAGE.to_owned(),
            error_body_limit: DEFAULT_ERROR_BODY_LIMIT,
        }
    }
}

impl LlmConfig {
    /// The configured key, else the `OPENAI_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
    }
}

/// Speech configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Voice name (None = backend default).
    pub voice: Option<String>,
    /// Speaking rate multiplier (0.5–2.0).
    pub rate: f32,
    /// Pitch multiplier (0.5–2.0).
    pub pitch: f32,
    /// Volume (0.0–1.0).
    pub volume: f32,
    /// Longest utterance, in characters, submitted to the backend.
    pub max_chunk_chars: usize,
    /// Characters that end a sentence.
    pub terminators: String,
    /// Retries per utterance for retryable backend failures.
    pub retry_limit: u32,
    /// Delay before retrying a failed utterance (ms).
    pub retry_delay_ms: u64,
    /// Delay before moving past a dropped utterance (ms).
    pub skip_delay_ms: u64,
    /// Remove markdown marker characters before speaking.
    pub strip_markup: bool,
    /// Program used by the command backend.
    pub command: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            max_chunk_chars: 160,
            terminators: ".!?".to_owned(),
            retry_limit: 2,
            retry_delay_ms: 250,
            skip_delay_ms: 100,
            strip_markup: true,
            command: "espeak-ng".to_owned(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    /// Returns the default config file path: `<config dir>/voxstream/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("voxstream")
            .join("config.toml")
    }
}
