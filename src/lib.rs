//! Voxstream: read streamed chat completions aloud as they arrive.
//!
//! The crate has two halves connected only by the growing response text:
//!
//! - [`llm`]: sends an OpenAI-compatible streaming request and turns the
//!   server-sent-event body into a sequence of cumulative
//!   [`ResponseSnapshot`]s.
//! - [`tts`]: finds sentence boundaries in that text, splits it into
//!   bounded chunks, and plays them serially with retry and cancellation.

pub mod config;
pub mod error;
pub mod llm;
pub mod tts;

pub use config::{AppConfig, LlmConfig, TtsConfig};
pub use error::{Error, Result};
pub use llm::{
    ChatMessage, LlmError, RequestSpec, ResponseSnapshot, SessionState, SnapshotStream,
    StreamSession,
};
pub use tts::{
    CommandBackend, PlaybackScheduler, Segmenter, SpeechBackend, SpeechChunk, SpeechFailure,
    SpeechReader,
};
