//! Completion request description and wire body.

use serde::{Deserialize, Serialize};

use super::error::LlmError;
use crate::config::LlmConfig;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default completion length cap.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
/// Default nucleus sampling mass.
pub const DEFAULT_TOP_P: f32 = 1.0;

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,
    /// End-user input.
    User,
    /// Previous model output.
    Assistant,
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote it.
    pub role: Role,
    /// What they wrote.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Sampling knobs sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Nucleus sampling mass.
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
        }
    }
}

/// Everything needed to start one streamed completion.
///
/// Immutable for the life of a stream; the session only reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    /// API base, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Model id.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Sampling parameters.
    pub sampling: SamplingParams,
    /// Tools offered to the model. Omitted from the body when empty.
    pub tools: Vec<ToolDefinition>,
}

impl RequestSpec {
    /// Create a spec with default sampling and no tools.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            messages,
            sampling: SamplingParams::default(),
            tools: Vec::new(),
        }
    }

    /// Build a spec from configuration plus a conversation.
    ///
    /// The configured system prompt, if any, is prepended.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Config`] when no API key is configured or the model
    /// is empty.
    pub fn from_config(config: &LlmConfig, messages: Vec<ChatMessage>) -> Result<Self, LlmError> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| LlmError::Config("no API key configured".into()))?;
        if config.model.trim().is_empty() {
            return Err(LlmError::Config("model must not be empty".into()));
        }

        let mut all = Vec::with_capacity(messages.len() + 1);
        if let Some(prompt) = config.system_prompt.as_deref()
            && !prompt.trim().is_empty()
        {
            all.push(ChatMessage::system(prompt));
        }
        all.extend(messages);

        Ok(Self {
            base_url: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
            messages: all,
            sampling: SamplingParams {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                top_p: config.top_p,
            },
            tools: Vec::new(),
        })
    }

    /// Set sampling parameters.
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Attach tool definitions.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// `<base_url>/chat/completions`, tolerating a trailing slash on the base.
    pub fn endpoint_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// The JSON body for a streamed Chat Completions request.
    pub fn body(&self) -> serde_json::Value {
        let sampling = sanitize(self.sampling);
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": self.messages,
            "temperature": sampling.temperature,
            "max_tokens": sampling.max_tokens,
            "top_p": sampling.top_p,
            "stream": true,
        });

        if !self.tools.is_empty()
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("tools".into(), tools_to_wire(&self.tools));
        }

        body
    }
}

/// Replace non-finite floats with defaults; JSON cannot carry them anyway.
fn sanitize(sampling: SamplingParams) -> SamplingParams {
    SamplingParams {
        temperature: finite_or(sampling.temperature, DEFAULT_TEMPERATURE),
        max_tokens: sampling.max_tokens,
        top_p: finite_or(sampling.top_p, DEFAULT_TOP_P),
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

fn tools_to_wire(tools: &[ToolDefinition]) -> serde_json::Value {
    let tools_json: Vec<serde_json::Value> = tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect();
    serde_json::json!(tools_json)
}
