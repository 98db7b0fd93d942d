//! Speech backend abstraction.

use async_trait::async_trait;
use tokio::sync::broadcast;

/// A voice offered by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Backend-specific voice name.
    pub name: String,
    /// Language tag, e.g. `en-US`.
    pub lang: String,
    /// Whether the backend marks this voice as its default.
    pub is_default: bool,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
            is_default: false,
        }
    }
}

/// Pick the voice to use when none is selected: the backend default, else
/// the first voice.
pub fn default_voice(voices: &[Voice]) -> Option<&Voice> {
    voices.iter().find(|v| v.is_default).or_else(|| voices.first())
}

/// Settings applied to every utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    /// Voice name (None = backend default).
    pub voice: Option<String>,
    /// Rate multiplier, clamped to 0.5–2.0.
    pub rate: f32,
    /// Pitch multiplier, clamped to 0.5–2.0.
    pub pitch: f32,
    /// Volume, clamped to 0.0–1.0.
    pub volume: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

impl VoiceSettings {
    pub fn from_config(config: &crate::config::TtsConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            rate: config.rate,
            pitch: config.pitch,
            volume: config.volume,
        }
        .clamped()
    }

    /// Settings with every value forced into its valid range.
    /// Non-finite values become the defaults.
    #[must_use]
    pub fn clamped(self) -> Self {
        fn clamp(v: f32, lo: f32, hi: f32, default: f32) -> f32 {
            if v.is_finite() { v.clamp(lo, hi) } else { default }
        }
        Self {
            rate: clamp(self.rate, 0.5, 2.0, 1.0),
            pitch: clamp(self.pitch, 0.5, 2.0, 1.0),
            volume: clamp(self.volume, 0.0, 1.0, 1.0),
            voice: self.voice,
        }
    }
}

/// One request to speak a chunk of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Sequence number of the chunk being spoken.
    pub seq: u64,
    pub text: String,
    pub settings: VoiceSettings,
}

/// Why an utterance did not finish.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechFailure {
    /// Playback was canceled, by us or by the platform.
    #[error("speech canceled")]
    Canceled,
    /// Playback was interrupted by other audio.
    #[error("speech interrupted")]
    Interrupted,
    /// The synthesizer could not render the text.
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),
    /// A network voice could not be reached.
    #[error("network error: {0}")]
    Network(String),
    /// Anything else.
    #[error("speech error: {0}")]
    Other(String),
}

/// How the scheduler reacts to a [`SpeechFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Stop quietly; the failure was requested or expected.
    Suppressed,
    /// Try the same chunk again after a delay.
    Retryable,
    /// Drop the chunk and continue with the next one.
    Fatal,
}

impl SpeechFailure {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Canceled | Self::Interrupted => FailureClass::Suppressed,
            Self::SynthesisFailed(_) | Self::Network(_) => FailureClass::Retryable,
            Self::Other(_) => FailureClass::Fatal,
        }
    }
}

/// A platform speech engine.
///
/// `speak` resolves when the utterance has finished playing. `cancel` stops
/// whatever is playing; an in-flight `speak` should then resolve with
/// [`SpeechFailure::Canceled`].
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Speak one utterance to completion.
    async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechFailure>;

    /// Stop any in-progress utterance.
    fn cancel(&self);

    /// Voices currently available.
    async fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    /// Notifications that the voice list changed, if the backend emits them.
    fn voice_events(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}
