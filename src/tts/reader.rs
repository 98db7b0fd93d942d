//! Reading a streamed response aloud as it arrives.

use std::sync::Arc;

use tracing::debug;

use crate::config::TtsConfig;
use crate::tts::backend::SpeechBackend;
use crate::tts::scheduler::PlaybackScheduler;
use crate::tts::segmenter::{Segmenter, SpeechCursor};
use crate::tts::text::speakable_text;

/// Feeds a growing response into a [`PlaybackScheduler`] one sentence
/// boundary at a time.
#[derive(Debug)]
pub struct SpeechReader {
    scheduler: PlaybackScheduler,
    segmenter: Segmenter,
    cursor: SpeechCursor,
    strip_markup: bool,
}

impl SpeechReader {
    pub fn new(scheduler: PlaybackScheduler, segmenter: Segmenter) -> Self {
        Self {
            scheduler,
            segmenter,
            cursor: SpeechCursor::default(),
            strip_markup: true,
        }
    }

    /// Build the scheduler and segmenter from speech configuration.
    pub fn from_config(backend: Arc<dyn SpeechBackend>, config: &TtsConfig) -> Self {
        Self {
            strip_markup: config.strip_markup,
            ..Self::new(
                PlaybackScheduler::from_config(backend, config),
                Segmenter::from_config(config),
            )
        }
    }

    /// Whether markdown markers are removed before speaking.
    #[must_use]
    pub fn with_strip_markup(mut self, strip: bool) -> Self {
        self.strip_markup = strip;
        self
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Byte offset into the (prepared) response already handed to speech.
    pub fn offset(&self) -> usize {
        self.cursor.offset
    }

    fn prepare(&self, content: &str) -> String {
        if self.strip_markup {
            speakable_text(content)
        } else {
            content.to_owned()
        }
    }

    /// Offer the latest response content. Returns the number of chunks
    /// queued. Does nothing while `speech_active` is false.
    pub fn update(&mut self, content: &str, stream_complete: bool, speech_active: bool) -> usize {
        if !speech_active {
            return 0;
        }
        let text = self.prepare(content);
        let (chunks, cursor) = self.segmenter.next(&text, self.cursor, stream_complete);
        self.cursor = cursor;
        let count = chunks.len();
        if count > 0 {
            debug!(count, offset = cursor.offset, stream_complete, "queueing speech");
            self.scheduler.enqueue(chunks);
        }
        count
    }

    /// A new request is starting: silence the previous answer.
    pub fn on_request_started(&mut self) {
        self.stop();
    }

    /// Speak a whole response from the start, replacing anything queued.
    pub fn speak_full(&mut self, content: &str) -> usize {
        self.stop();
        let text = self.prepare(content);
        let chunks = self.segmenter.chunk_all(&text, &mut self.cursor);
        self.cursor.offset = text.len();
        let count = chunks.len();
        self.scheduler.enqueue(chunks);
        count
    }

    /// Stop playback and forget how much has been spoken.
    pub fn stop(&mut self) {
        self.scheduler.stop();
        self.cursor = self.cursor.rewound();
    }
}
