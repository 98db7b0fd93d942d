//! Speaking a streamed response sentence by sentence.
//!
//! ```text
//! content ─▶ speakable_text ─▶ Segmenter ─▶ PlaybackScheduler ─▶ SpeechBackend
//! ```
//!
//! [`SpeechReader`] ties the stages together for one response at a time.

pub mod backend;
pub mod command;
pub mod reader;
pub mod scheduler;
pub mod segmenter;
pub mod text;

pub use backend::{
    FailureClass, SpeechBackend, SpeechFailure, Utterance, Voice, VoiceSettings, default_voice,
};
pub use command::CommandBackend;
pub use reader::SpeechReader;
pub use scheduler::{PlaybackScheduler, RetryPolicy};
pub use segmenter::{Segmenter, SpeechChunk, SpeechCursor};
pub use text::speakable_text;
