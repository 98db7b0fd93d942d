//! Streamed completion sessions.
//!
//! A [`StreamSession`] sends one request at a time and turns the response
//! body into a stream of [`ResponseSnapshot`]s, one per content delta.
//!
//! ```text
//! Idle ─start─▶ Sending ─2xx─▶ Streaming ─EOF─▶ Completed
//!                  │                │
//!                  └──error──▶ Failed ◀──error──┘
//!            (any state) ─cancel/new request─▶ Cancelled
//! ```
//!
//! The read loop is strictly sequential: read, split into frames, parse,
//! fold, emit, and only then read again.
//!
//! # Examples
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use voxstream::llm::request::{ChatMessage, RequestSpec};
//! use voxstream::llm::session::StreamSession;
//!
//! # async fn example() -> Result<(), voxstream::llm::error::LlmError> {
//! let session = StreamSession::new();
//! let spec = RequestSpec::new(
//!     "https://api.openai.com/v1",
//!     "sk-...",
//!     "gpt-4o-mini",
//!     vec![ChatMessage::user("Hello")],
//! );
//! let mut snapshots = session.start(&spec).await?;
//! while let Some(snapshot) = snapshots.next().await {
//!     println!("{}", snapshot?.content);
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::accumulator::{ResponseAccumulator, ResponseSnapshot};
use super::error::LlmError;
use super::event::{DeltaEvent, SkipReason, parse_frame};
use super::frame::FrameReader;
use super::request::RequestSpec;
use crate::config::LlmConfig;

/// Message used for HTTP 429, whatever the body says.
pub const DEFAULT_RATE_LIMIT_MESSAGE: &str =
    "Too many requests have been sent, please wait a moment and try again";

/// Raw error bodies at or above this many characters are not shown.
pub const DEFAULT_ERROR_BODY_LIMIT: usize = 200;

/// A boxed stream of snapshots. Ends normally on EOF, or after one `Err`.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<ResponseSnapshot, LlmError>> + Send>>;

/// Timing and counters for one finished stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Time from `start` to the first content delta.
    pub first_delta: Option<Duration>,
    /// Time from `start` to end of body.
    pub elapsed: Duration,
    /// Content deltas emitted.
    pub deltas: usize,
    /// Frames that were `data:` lines but failed to decode.
    pub malformed: usize,
    /// Final content length in bytes.
    pub content_len: usize,
}

/// Lifecycle of the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Request sent, waiting for headers.
    Sending,
    /// Reading the body.
    Streaming,
    /// Body ended normally.
    Completed(SessionStats),
    /// Request or stream failed.
    Failed(LlmError),
    /// Aborted by `cancel` or superseded by a newer request.
    Cancelled,
}

impl SessionState {
    /// Whether no further transitions will happen for this request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Cancelled)
    }

    /// Whether a request is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

struct Shared {
    state: watch::Sender<SessionState>,
    generation: AtomicU64,
    cancel: Mutex<CancellationToken>,
}

impl Shared {
    /// Update the state only if `generation` is still the current request.
    fn transition(&self, generation: u64, next: SessionState) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.state.send_replace(next);
        }
    }
}

/// Drives one streamed completion at a time.
///
/// Starting a new request cancels the previous one; its stream ends without
/// emitting anything further.
#[derive(Clone)]
pub struct StreamSession {
    client: reqwest::Client,
    rate_limit_message: String,
    error_body_limit: usize,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("state", &*self.shared.state.borrow())
            .field("error_body_limit", &self.error_body_limit)
            .finish()
    }
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    /// Create a session with a fresh HTTP client and default error policy.
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Create a session that reuses `client`.
    pub fn with_client(client: reqwest::Client) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            client,
            rate_limit_message: DEFAULT_RATE_LIMIT_MESSAGE.to_owned(),
            error_body_limit: DEFAULT_ERROR_BODY_LIMIT,
            shared: Arc::new(Shared {
                state,
                generation: AtomicU64::new(0),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Create a session using the error policy from `config`.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut session = Self::new();
        session.rate_limit_message = config.rate_limit_message.clone();
        session.error_body_limit = config.error_body_limit;
        session
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Abort the current request, if any. Idempotent.
    pub fn cancel(&self) {
        let token = self
            .shared
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if !token.is_cancelled() {
            token.cancel();
            let generation = self.shared.generation.load(Ordering::SeqCst);
            if self.shared.state.borrow().is_active() {
                self.shared.transition(generation, SessionState::Cancelled);
            }
        }
    }

    /// Send `spec` and return its snapshot stream.
    ///
    /// Any request still running on this session is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns the error that moved the session to [`SessionState::Failed`]:
    /// a transport failure, a non-2xx status, or an empty body. Returns
    /// [`LlmError::Cancelled`] if the request was cancelled before its stream
    /// started, including while an error body was being read.
    pub async fn start(&self, spec: &RequestSpec) -> Result<SnapshotStream, LlmError> {
        let cancel = CancellationToken::new();
        {
            let mut slot = self
                .shared
                .cancel
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slot.cancel();
            *slot = cancel.clone();
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.transition(generation, SessionState::Sending);

        let session_id = Uuid::new_v4();
        let url = spec.endpoint_url();
        let started = Instant::now();
        info!(%session_id, model = %spec.model, %url, "starting completion stream");

        let request = self
            .client
            .post(&url)
            .bearer_auth(&spec.api_key)
            .header("Content-Type", "application/json")
            .json(&spec.body())
            .send();

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return Err(self.cancelled(generation, session_id));
            }
            response = request => response,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let err = LlmError::Transport(format!("request failed: {e}"));
                warn!(%session_id, error = %err, "completion request failed");
                self.shared
                    .transition(generation, SessionState::Failed(err.clone()));
                return Err(err);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                () = cancel.cancelled() => {
                    return Err(self.cancelled(generation, session_id));
                }
                body = response.text() => body.unwrap_or_default(),
            };
            let err = self.http_error(status.as_u16(), &body);
            warn!(%session_id, status = status.as_u16(), error = %err, "completion request rejected");
            self.shared
                .transition(generation, SessionState::Failed(err.clone()));
            return Err(err);
        }

        if response.content_length() == Some(0) {
            let err = LlmError::EmptyBody;
            warn!(%session_id, "completion response has no body");
            self.shared
                .transition(generation, SessionState::Failed(err.clone()));
            return Err(err);
        }

        self.shared.transition(generation, SessionState::Streaming);
        let run = StreamRun {
            session_id,
            model: spec.model.clone(),
            cancel,
            generation,
            shared: Arc::clone(&self.shared),
            started,
        };
        Ok(Box::pin(snapshot_stream(response.bytes_stream(), run)))
    }

    fn cancelled(&self, generation: u64, session_id: Uuid) -> LlmError {
        debug!(%session_id, "completion request cancelled before streaming");
        self.shared.transition(generation, SessionState::Cancelled);
        LlmError::Cancelled
    }

    /// Map a non-2xx response to an error, honoring the rate-limit override.
    pub fn http_error(&self, status: u16, body: &str) -> LlmError {
        let message = if status == 429 {
            self.rate_limit_message.clone()
        } else {
            describe_http_error(status, body, self.error_body_limit)
        };
        LlmError::HttpStatus { status, message }
    }
}

/// Best-effort human-readable message from an error response body.
///
/// Order of preference: `error` as a string; `error.message`, `error.code`,
/// `error.type`, or the raw `error` object; a top-level `message`. A body that
/// is not JSON is shown verbatim only when shorter than `body_limit`
/// characters; otherwise the status line alone is used.
pub fn describe_http_error(status: u16, body: &str, body_limit: usize) -> String {
    let status_line = match reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("HTTP {status} {reason}"),
        None => format!("HTTP {status}"),
    };

    let parsed: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => {
            let trimmed = body.trim();
            if !trimmed.is_empty() && trimmed.chars().count() < body_limit {
                return format!("{status_line} ({trimmed})");
            }
            return status_line;
        }
    };

    match parsed.get("error") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => return s.clone(),
        Some(serde_json::Value::Object(obj)) => {
            let pick = |key: &str| match obj.get(key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            return pick("message")
                .or_else(|| pick("code"))
                .or_else(|| pick("type"))
                .unwrap_or_else(|| serde_json::Value::Object(obj.clone()).to_string());
        }
        _ => {}
    }

    match parsed.get("message").and_then(|m| m.as_str()) {
        Some(message) if !message.is_empty() => message.to_owned(),
        _ => status_line,
    }
}

/// Per-request context carried by the snapshot stream.
pub(crate) struct StreamRun {
    session_id: Uuid,
    model: String,
    cancel: CancellationToken,
    generation: u64,
    shared: Arc<Shared>,
    started: Instant,
}

impl StreamRun {
    fn finish(&self, state: SessionState) {
        self.shared.transition(self.generation, state);
    }
}

enum Step {
    Emit(ResponseSnapshot),
    Nothing,
}

fn handle_frame(
    frame: &str,
    acc: &mut ResponseAccumulator,
    stats: &mut SessionStats,
    run: &StreamRun,
) -> Step {
    let event = parse_frame(frame);
    match &event {
        DeltaEvent::Skip {
            reason: SkipReason::Malformed,
        } => stats.malformed += 1,
        DeltaEvent::Sentinel => {
            debug!(session_id = %run.session_id, "received [DONE]; waiting for end of body");
        }
        _ => {}
    }

    if !acc.push(&event) {
        return Step::Nothing;
    }
    stats.deltas += 1;
    if stats.first_delta.is_none() {
        stats.first_delta = Some(run.started.elapsed());
    }
    Step::Emit(acc.snapshot().with_fallback_model(&run.model))
}

/// Decode a response body into snapshots.
///
/// Generic over the byte source so it can be driven by anything that
/// yields chunks, not only a live HTTP response.
pub(crate) fn snapshot_stream<S, E>(
    body: S,
    run: StreamRun,
) -> impl Stream<Item = Result<ResponseSnapshot, LlmError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut frames = FrameReader::new();
        let mut acc = ResponseAccumulator::new();
        let mut stats = SessionStats::default();

        loop {
            let next = tokio::select! {
                biased;
                () = run.cancel.cancelled() => None,
                next = body.next() => Some(next),
            };

            match next {
                None => {
                    debug!(session_id = %run.session_id, "stream cancelled");
                    run.finish(SessionState::Cancelled);
                    break;
                }
                Some(Some(Ok(chunk))) => {
                    for frame in frames.feed(&chunk) {
                        if run.cancel.is_cancelled() {
                            break;
                        }
                        if let Step::Emit(snapshot) = handle_frame(&frame, &mut acc, &mut stats, &run) {
                            yield Ok(snapshot);
                        }
                    }
                }
                Some(Some(Err(e))) => {
                    let err = LlmError::Transport(format!("stream read failed: {e}"));
                    warn!(session_id = %run.session_id, error = %err, deltas = stats.deltas, "stream aborted");
                    run.finish(SessionState::Failed(err.clone()));
                    yield Err(err);
                    break;
                }
                Some(None) => {
                    if let Some(frame) = frames.flush() {
                        if !run.cancel.is_cancelled() {
                            if let Step::Emit(snapshot) = handle_frame(&frame, &mut acc, &mut stats, &run) {
                                yield Ok(snapshot);
                            }
                        }
                    }
                    if run.cancel.is_cancelled() {
                        run.finish(SessionState::Cancelled);
                        break;
                    }
                    stats.elapsed = run.started.elapsed();
                    stats.content_len = acc.snapshot().content.len();
                    info!(
                        session_id = %run.session_id,
                        elapsed_ms = stats.elapsed.as_millis() as u64,
                        first_delta_ms = stats.first_delta.map(|d| d.as_millis() as u64),
                        deltas = stats.deltas,
                        malformed = stats.malformed,
                        content_len = stats.content_len,
                        "completion stream finished"
                    );
                    run.finish(SessionState::Completed(stats.clone()));
                    break;
                }
            }
        }
    }
}
