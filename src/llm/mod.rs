//! Incremental decoding of streamed chat completions.
//!
//! Bytes from the response body flow through four stages:
//!
//! ```text
//! bytes ─▶ FrameReader ─▶ parse_frame ─▶ ResponseAccumulator ─▶ ResponseSnapshot*
//! ```
//!
//! [`StreamSession`](session::StreamSession) owns the HTTP side and drives
//! the stages one read at a time.

pub mod accumulator;
pub mod error;
pub mod event;
pub mod frame;
pub mod request;
pub mod session;

pub use accumulator::{ResponseAccumulator, ResponseSnapshot};
pub use error::LlmError;
pub use event::{ContentDelta, DeltaEvent, SkipReason, Usage};
pub use frame::FrameReader;
pub use request::{ChatMessage, RequestSpec, Role, SamplingParams, ToolDefinition};
pub use session::{SessionState, SessionStats, SnapshotStream, StreamSession};
