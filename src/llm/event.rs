//! Parsing of individual stream frames into delta events.
//!
//! A completions stream looks like:
//!
//! ```text
//! data: {"id":"r1","model":"m","choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}
//!
//! data: [DONE]
//! ```
//!
//! Every frame maps to exactly one [`DeltaEvent`]. Nothing here returns an
//! error: a frame that cannot be understood becomes [`DeltaEvent::Skip`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Prefix of frames that carry a payload.
pub const DATA_PREFIX: &str = "data:";

/// Payload that marks the logical end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Token accounting reported by the server, usually on the last frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u64,
    /// Tokens generated so far.
    pub completion_tokens: u64,
    /// Server-reported total.
    pub total_tokens: u64,
}

/// Why a frame produced no content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Blank line, comment, or any line without the `data:` prefix.
    NotData,
    /// A `data:` line whose payload did not decode.
    Malformed,
}

impl SkipReason {
    /// Short label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotData => "not-data",
            Self::Malformed => "malformed",
        }
    }
}

/// One incremental piece of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDelta {
    /// Response id; usually only present on some frames.
    pub id: Option<String>,
    /// Model name as reported by the server.
    pub model: Option<String>,
    /// Unix timestamp (seconds) the server assigned to the response.
    pub created_at: Option<i64>,
    /// Incremental text; empty for role-only or usage-only frames.
    pub text: String,
    /// Why generation stopped, on the final content frame.
    pub finish_reason: Option<String>,
    /// Token usage, if this frame carries it.
    pub usage: Option<Usage>,
}

/// Parsed outcome of a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEvent {
    /// A decoded payload.
    Content(ContentDelta),
    /// The `[DONE]` marker.
    Sentinel,
    /// Nothing usable in this frame.
    Skip {
        /// Why the frame was skipped.
        reason: SkipReason,
    },
}

impl DeltaEvent {
    fn skip(reason: SkipReason) -> Self {
        Self::Skip { reason }
    }
}

// Wire shapes. Every field is optional; servers disagree about what they send
// on which frame.

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    id: Option<String>,
    model: Option<String>,
    created: Option<i64>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Parse one frame.
///
/// # Examples
///
/// ```
/// use voxstream::llm::event::{parse_frame, DeltaEvent, SkipReason};
///
/// let event = parse_frame(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#);
/// match event {
///     DeltaEvent::Content(delta) => assert_eq!(delta.text, "Hi"),
///     other => panic!("unexpected {other:?}"),
/// }
///
/// assert_eq!(parse_frame("data: [DONE]"), DeltaEvent::Sentinel);
/// assert_eq!(
///     parse_frame(": ping"),
///     DeltaEvent::Skip { reason: SkipReason::NotData }
/// );
/// ```
pub fn parse_frame(frame: &str) -> DeltaEvent {
    let line = frame.trim();
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        if !line.is_empty() {
            debug!(frame = line, "ignoring non-data frame");
        }
        return DeltaEvent::skip(SkipReason::NotData);
    };
    let payload = payload.trim_start();

    if payload == DONE_SENTINEL {
        return DeltaEvent::Sentinel;
    }

    let chunk: CompletionChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, payload, "skipping malformed stream frame");
            return DeltaEvent::skip(SkipReason::Malformed);
        }
    };

    let first = chunk.choices.into_iter().next();
    let (text, finish_reason) = match first {
        Some(choice) => (
            choice.delta.and_then(|d| d.content).unwrap_or_default(),
            choice.finish_reason,
        ),
        None => (String::new(), None),
    };

    DeltaEvent::Content(ContentDelta {
        id: chunk.id,
        model: chunk.model,
        created_at: chunk.created,
        text,
        finish_reason,
        usage: chunk.usage,
    })
}
