//! Folding delta events into a response snapshot.
//!
//! [`apply`] is the whole algorithm: a pure left fold over [`DeltaEvent`]s.
//! [`ResponseAccumulator`] owns a snapshot and folds into it in place.
//!
//! # Usage
//!
//! ```
//! use voxstream::llm::accumulator::ResponseAccumulator;
//! use voxstream::llm::event::parse_frame;
//!
//! let mut acc = ResponseAccumulator::new();
//! acc.push(&parse_frame(r#"data: {"id":"r1","choices":[{"delta":{"content":"Hel"}}]}"#));
//! acc.push(&parse_frame(r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#));
//! acc.push(&parse_frame("data: [DONE]"));
//!
//! assert_eq!(acc.snapshot().content, "Hello");
//! assert_eq!(acc.snapshot().id, "r1");
//! ```

use serde::Serialize;

use super::event::{ContentDelta, DeltaEvent, Usage};

/// The accumulated view of one response.
///
/// `id`, `model` and `created_at` are sticky: the first non-empty value wins.
/// `content` only ever grows. `finish_reason` and `usage` track the most recent
/// non-empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseSnapshot {
    /// Response id, empty until the server sends one.
    pub id: String,
    /// Model name, empty until the server sends one.
    pub model: String,
    /// Server-assigned creation time (unix seconds).
    pub created_at: Option<i64>,
    /// Everything generated so far.
    pub content: String,
    /// Last non-empty finish reason.
    pub finish_reason: Option<String>,
    /// Last usage report.
    pub usage: Option<Usage>,
}

impl ResponseSnapshot {
    /// Whether no content has arrived yet.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Copy of this snapshot with `model` filled in from the request when the
    /// server never reported one.
    pub fn with_fallback_model(&self, requested: &str) -> Self {
        let mut out = self.clone();
        if out.model.is_empty() {
            out.model = requested.to_owned();
        }
        out
    }

    /// Render as a non-streaming `chat.completion` object.
    ///
    /// Useful for JSON export of a finished (or partial) response.
    pub fn to_completion(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "object": "chat.completion",
            "created": self.created_at,
            "model": self.model,
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": self.content,
                },
                "finish_reason": self.finish_reason.as_deref().unwrap_or(""),
            }],
            "usage": self.usage,
        })
    }
}

/// Fold one event into a snapshot.
///
/// `Skip` and `Sentinel` leave the snapshot untouched; termination is the
/// session loop's business.
pub fn apply(mut snapshot: ResponseSnapshot, event: &DeltaEvent) -> ResponseSnapshot {
    if let DeltaEvent::Content(delta) = event {
        merge(&mut snapshot, delta);
    }
    snapshot
}

fn merge(snapshot: &mut ResponseSnapshot, delta: &ContentDelta) {
    set_sticky(&mut snapshot.id, delta.id.as_deref());
    set_sticky(&mut snapshot.model, delta.model.as_deref());
    if snapshot.created_at.is_none() {
        snapshot.created_at = delta.created_at;
    }

    snapshot.content.push_str(&delta.text);

    if let Some(reason) = delta.finish_reason.as_deref()
        && !reason.is_empty()
    {
        snapshot.finish_reason = Some(reason.to_owned());
    }
    if delta.usage.is_some() {
        snapshot.usage = delta.usage;
    }
}

fn set_sticky(slot: &mut String, value: Option<&str>) {
    if slot.is_empty()
        && let Some(v) = value
        && !v.is_empty()
    {
        *slot = v.to_owned();
    }
}

/// Owns a snapshot and folds events into it.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    snapshot: ResponseSnapshot,
}

impl ResponseAccumulator {
    /// Start from the empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `event` in. Returns `true` if it was a content delta, i.e. an
    /// update observers should see.
    pub fn push(&mut self, event: &DeltaEvent) -> bool {
        match event {
            DeltaEvent::Content(delta) => {
                merge(&mut self.snapshot, delta);
                true
            }
            DeltaEvent::Sentinel | DeltaEvent::Skip { .. } => false,
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> &ResponseSnapshot {
        &self.snapshot
    }

    /// Drop everything and return to the empty snapshot.
    pub fn reset(&mut self) {
        self.snapshot = ResponseSnapshot::default();
    }

    /// Consume the accumulator.
    pub fn finish(self) -> ResponseSnapshot {
        self.snapshot
    }
}
