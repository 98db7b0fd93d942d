//! Error types for completion streaming.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via [`LlmError::code()`].
//!
//! A single malformed `data:` line is deliberately *not* represented here:
//! it is skipped by the event parser and never reaches the caller.

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Connection-level failure before or during streaming.
    pub const TRANSPORT_FAILED: &str = "TRANSPORT_FAILED";

    /// The endpoint answered with a non-2xx status.
    pub const HTTP_STATUS: &str = "HTTP_STATUS";

    /// The endpoint answered 2xx but without a readable body.
    pub const EMPTY_BODY: &str = "EMPTY_BODY";

    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// The caller cancelled the request before its stream started.
    pub const CANCELLED: &str = "CANCELLED";
}

/// Errors that end a [`StreamSession`](crate::llm::session::StreamSession).
///
/// All variants are fatal to the session that produced them. Snapshots
/// emitted before the error remain valid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// Connection reset, DNS failure, body read failure, etc.
    #[error("[{}] {}", error_codes::TRANSPORT_FAILED, .0)]
    Transport(String),

    /// Non-success status with a best-effort extracted message.
    #[error("[{}] {}", error_codes::HTTP_STATUS, .message)]
    HttpStatus {
        /// Numeric HTTP status.
        status: u16,
        /// Human-readable message extracted from the body.
        message: String,
    },

    /// The response had no body to stream.
    #[error("[{}] empty response body", error_codes::EMPTY_BODY)]
    EmptyBody,

    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Cancelled by the caller, or superseded by a newer request.
    #[error("[{}] request cancelled", error_codes::CANCELLED)]
    Cancelled,
}

impl LlmError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => error_codes::TRANSPORT_FAILED,
            Self::HttpStatus { .. } => error_codes::HTTP_STATUS,
            Self::EmptyBody => error_codes::EMPTY_BODY,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Cancelled => error_codes::CANCELLED,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport(m) | Self::Config(m) => m,
            Self::HttpStatus { message, .. } => message,
            Self::EmptyBody => "empty response body",
            Self::Cancelled => "request cancelled",
        }
    }

    /// The HTTP status, if this error came from a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a caller could reasonably resend the same request.
    ///
    /// The session itself never retries; this is a hint for the UI layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyBody | Self::Config(_) | Self::Cancelled => false,
        }
    }
}
