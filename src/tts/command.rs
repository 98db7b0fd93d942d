//! Speech through an external synthesizer program.
//!
//! The program is invoked once per utterance with espeak-ng style flags:
//! `-v VOICE -s WPM -p PITCH -a AMPLITUDE -- TEXT`. Voices come from
//! `PROGRAM --voices`.

use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tts::backend::{SpeechBackend, SpeechFailure, Utterance, Voice};

/// Speaking rate at multiplier 1.0, in words per minute.
pub const BASE_WPM: f32 = 175.0;
/// Pitch at multiplier 1.0 (program range 0–99).
pub const BASE_PITCH: f32 = 50.0;
/// Amplitude at volume 1.0 (program range 0–200).
pub const BASE_AMPLITUDE: f32 = 100.0;

/// [`SpeechBackend`] that runs a command-line synthesizer.
pub struct CommandBackend {
    program: String,
    current: Mutex<CancellationToken>,
}

impl std::fmt::Debug for CommandBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBackend")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl CommandBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            current: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for one utterance.
    pub fn args_for(utterance: &Utterance) -> Vec<String> {
        let s = &utterance.settings;
        let mut args = Vec::with_capacity(10);
        if let Some(voice) = s.voice.as_deref().filter(|v| !v.is_empty()) {
            args.push("-v".to_owned());
            args.push(voice.to_owned());
        }
        let wpm = (BASE_WPM * s.rate).round().max(1.0) as u32;
        let pitch = (BASE_PITCH * s.pitch).round().clamp(0.0, 99.0) as u32;
        let amplitude = (BASE_AMPLITUDE * s.volume).round().clamp(0.0, 200.0) as u32;
        args.extend([
            "-s".to_owned(),
            wpm.to_string(),
            "-p".to_owned(),
            pitch.to_string(),
            "-a".to_owned(),
            amplitude.to_string(),
            "--".to_owned(),
            utterance.text.clone(),
        ]);
        args
    }

    fn begin(&self) -> CancellationToken {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = CancellationToken::new();
        current.clone()
    }
}

#[async_trait]
impl SpeechBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.program
    }

    async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechFailure> {
        let token = self.begin();
        let child = Command::new(&self.program)
            .args(Self::args_for(utterance))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpeechFailure::Other(format!("failed to start {}: {e}", self.program)))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(seq = utterance.seq, "synthesizer killed");
                return Err(SpeechFailure::Canceled);
            }
            output = child.wait_with_output() => output,
        };

        let output = output.map_err(|e| SpeechFailure::Other(e.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let detail = if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        };
        Err(SpeechFailure::SynthesisFailed(detail))
    }

    fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    async fn voices(&self) -> Vec<Voice> {
        let output = Command::new(&self.program)
            .arg("--voices")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                parse_voice_list(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                warn!(program = %self.program, status = %output.status, "voice listing failed");
                Vec::new()
            }
            Err(e) => {
                warn!(program = %self.program, error = %e, "voice listing failed");
                Vec::new()
            }
        }
    }
}

/// Parse the table printed by `espeak-ng --voices`.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File        Other Languages
///  5  af              --/M      Afrikaans          gmw/af
/// ```
///
/// The language column is what `-v` accepts, so it becomes the voice name.
pub fn parse_voice_list(output: &str) -> Vec<Voice> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let priority = fields.next()?;
            if priority.parse::<u32>().is_err() {
                return None;
            }
            let lang = fields.next()?;
            Some(Voice::new(lang, lang))
        })
        .collect()
}
