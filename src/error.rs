//! Top-level error type.

use crate::llm::error::LlmError;

/// Errors surfaced by configuration loading and request setup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Completion request or stream error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;
