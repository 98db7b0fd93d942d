//! Serial playback of speech chunks.
//!
//! A single worker task pops chunks from a FIFO queue and hands them to the
//! [`SpeechBackend`] one at a time. Failures are handled per
//! [`FailureClass`]:
//!
//! - `Suppressed`: go idle, leave the queue alone.
//! - `Retryable`: put the chunk back at the head and try again after
//!   `retry_delay`, at most `retry_limit` times.
//! - `Fatal`, or retries exhausted: drop the chunk and continue after
//!   `skip_delay`.
//!
//! [`PlaybackScheduler::stop`] starts a new generation: the queue is
//! cleared, the retry counter reset and the in-flight utterance canceled.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TtsConfig;
use crate::tts::backend::{
    FailureClass, SpeechBackend, SpeechFailure, Utterance, Voice, VoiceSettings, default_voice,
};
use crate::tts::segmenter::SpeechChunk;

/// Retry and pacing settings for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries per chunk for retryable failures.
    pub retry_limit: u32,
    /// Wait before retrying a chunk.
    pub retry_delay: Duration,
    /// Wait before moving past a dropped chunk.
    pub skip_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            retry_delay: Duration::from_millis(250),
            skip_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            skip_delay: Duration::from_millis(config.skip_delay_ms),
        }
    }
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<SpeechChunk>,
    retries: u32,
    /// Set after a suppressed failure; cleared by the next enqueue or stop.
    halted: bool,
    generation: CancellationToken,
    settings: VoiceSettings,
    voices: Vec<Voice>,
}

struct Inner {
    queue: Mutex<Queue>,
    wake: Notify,
    busy: watch::Sender<bool>,
    backend: Arc<dyn SpeechBackend>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh_voices(&self) -> Vec<Voice> {
        let voices = self.backend.voices().await;
        let mut queue = self.lock();
        if queue.settings.voice.is_none()
            && let Some(voice) = default_voice(&voices)
        {
            info!(voice = %voice.name, "selected default voice");
            queue.settings.voice = Some(voice.name.clone());
        }
        queue.voices.clone_from(&voices);
        voices
    }
}

/// Plays queued chunks serially through a [`SpeechBackend`].
///
/// Must be created inside a Tokio runtime. Dropping the scheduler stops the
/// worker and cancels any in-flight utterance.
pub struct PlaybackScheduler {
    inner: Arc<Inner>,
    worker: JoinHandle<()>,
    voice_watcher: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("backend", &self.inner.backend.name())
            .field("policy", &self.inner.policy)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl PlaybackScheduler {
    /// Start a scheduler with default voice settings.
    pub fn new(backend: Arc<dyn SpeechBackend>, policy: RetryPolicy) -> Self {
        Self::with_settings(backend, policy, VoiceSettings::default())
    }

    /// Start a scheduler from speech configuration.
    pub fn from_config(backend: Arc<dyn SpeechBackend>, config: &TtsConfig) -> Self {
        Self::with_settings(
            backend,
            RetryPolicy::from_config(config),
            VoiceSettings::from_config(config),
        )
    }

    pub fn with_settings(
        backend: Arc<dyn SpeechBackend>,
        policy: RetryPolicy,
        settings: VoiceSettings,
    ) -> Self {
        let (busy, _) = watch::channel(false);
        let voice_events = backend.voice_events();
        let inner = Arc::new(Inner {
            queue: Mutex::new(Queue {
                settings: settings.clamped(),
                ..Queue::default()
            }),
            wake: Notify::new(),
            busy,
            backend,
            policy,
            shutdown: CancellationToken::new(),
        });

        let worker = tokio::spawn(run_worker(Arc::clone(&inner)));
        let voice_watcher =
            voice_events.map(|rx| tokio::spawn(watch_voices(Arc::clone(&inner), rx)));

        Self {
            inner,
            worker,
            voice_watcher,
        }
    }

    /// Append chunks to the queue and start playback if idle.
    pub fn enqueue(&self, chunks: impl IntoIterator<Item = SpeechChunk>) {
        let mut queue = self.inner.lock();
        let before = queue.pending.len();
        queue.pending.extend(chunks);
        let added = queue.pending.len() - before;
        if added == 0 {
            return;
        }
        queue.halted = false;
        debug!(added, queued = queue.pending.len(), "chunks enqueued");
        self.inner.busy.send_replace(true);
        drop(queue);
        self.inner.wake.notify_one();
    }

    /// Cancel the current utterance and discard everything queued.
    ///
    /// Idempotent; calling it while idle changes nothing observable.
    pub fn stop(&self) {
        let mut queue = self.inner.lock();
        let was_busy = *self.inner.busy.borrow();
        let dropped = queue.pending.len();
        queue.pending.clear();
        queue.retries = 0;
        queue.halted = false;
        queue.generation.cancel();
        queue.generation = CancellationToken::new();
        self.inner.busy.send_replace(false);

        // Still locked: the worker cannot start a new-generation utterance
        // for this cancel to hit.
        if was_busy || dropped > 0 {
            info!(dropped, "speech stopped");
            self.inner.backend.cancel();
        }
        drop(queue);
    }

    /// Whether a chunk is being spoken, retried or waiting to be spoken.
    pub fn is_busy(&self) -> bool {
        *self.inner.busy.borrow()
    }

    /// Number of chunks waiting behind the current one.
    pub fn queued(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Wait until the scheduler has nothing left to do.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.busy.subscribe();
        // The sender lives as long as `self`, so this only fails on drop.
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Voice settings applied to subsequent utterances.
    pub fn voice_settings(&self) -> VoiceSettings {
        self.inner.lock().settings.clone()
    }

    pub fn set_voice_settings(&self, settings: VoiceSettings) {
        self.inner.lock().settings = settings.clamped();
    }

    /// Voices seen at the last refresh.
    pub fn voices(&self) -> Vec<Voice> {
        self.inner.lock().voices.clone()
    }

    /// Reload the backend's voice list, selecting a default voice if none is
    /// chosen yet.
    pub async fn refresh_voices(&self) -> Vec<Voice> {
        self.inner.refresh_voices().await
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.inner.lock().generation.cancel();
        self.worker.abort();
        if let Some(watcher) = &self.voice_watcher {
            watcher.abort();
        }
    }
}

/// What the worker should do next.
enum Next {
    Speak(SpeechChunk, Utterance, CancellationToken),
    Idle,
}

async fn run_worker(inner: Arc<Inner>) {
    debug!(backend = inner.backend.name(), "speech worker started");
    loop {
        let next = {
            let mut queue = inner.lock();
            let chunk = if queue.halted {
                None
            } else {
                queue.pending.pop_front()
            };
            // Flipped under the lock so a concurrent enqueue is never lost.
            inner.busy.send_if_modified(|busy| {
                let changed = *busy != chunk.is_some();
                *busy = chunk.is_some();
                changed
            });
            match chunk {
                Some(chunk) => {
                    let utterance = Utterance {
                        seq: chunk.seq,
                        text: chunk.text.clone(),
                        settings: queue.settings.clone(),
                    };
                    Next::Speak(chunk, utterance, queue.generation.clone())
                }
                None => Next::Idle,
            }
        };

        let (chunk, utterance, generation) = match next {
            Next::Speak(chunk, utterance, generation) => (chunk, utterance, generation),
            Next::Idle => {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = inner.wake.notified() => continue,
                }
            }
        };

        debug!(seq = chunk.seq, chars = chunk.text.chars().count(), "speaking chunk");
        let outcome = tokio::select! {
            biased;
            _ = generation.cancelled() => Err(SpeechFailure::Canceled),
            result = inner.backend.speak(&utterance) => result,
        };

        let delay = settle(&inner, chunk, outcome, &generation);
        if let Some(delay) = delay {
            tokio::select! {
                _ = generation.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
    debug!("speech worker stopped");
}

/// Update the queue after an attempt. Returns the pause before the next one.
fn settle(
    inner: &Inner,
    chunk: SpeechChunk,
    outcome: Result<(), SpeechFailure>,
    generation: &CancellationToken,
) -> Option<Duration> {
    let mut queue = inner.lock();
    // A stop() already reset everything for the new generation.
    if generation.is_cancelled() {
        return None;
    }

    let failure = match outcome {
        Ok(()) => {
            queue.retries = 0;
            debug!(seq = chunk.seq, "chunk spoken");
            return None;
        }
        Err(failure) => failure,
    };

    match failure.class() {
        FailureClass::Suppressed => {
            debug!(seq = chunk.seq, %failure, "speech halted");
            queue.retries = 0;
            queue.halted = true;
            None
        }
        FailureClass::Retryable if queue.retries < inner.policy.retry_limit => {
            queue.retries += 1;
            warn!(
                seq = chunk.seq,
                attempt = queue.retries,
                limit = inner.policy.retry_limit,
                %failure,
                "retrying chunk"
            );
            queue.pending.push_front(chunk);
            Some(inner.policy.retry_delay)
        }
        _ => {
            warn!(seq = chunk.seq, %failure, "dropping chunk");
            queue.retries = 0;
            if queue.pending.is_empty() {
                None
            } else {
                Some(inner.policy.skip_delay)
            }
        }
    }
}

async fn watch_voices(inner: Arc<Inner>, mut events: broadcast::Receiver<()>) {
    inner.refresh_voices().await;
    loop {
        let event = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                let voices = inner.refresh_voices().await;
                debug!(count = voices.len(), "voice list refreshed");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::time::Instant;

    /// Backend that plays each utterance for a fixed time and replays
    /// scripted failures per text.
    #[derive(Default)]
    struct ScriptedBackend {
        play_time: Duration,
        failures: Mutex<HashMap<String, VecDeque<SpeechFailure>>>,
        attempts: Mutex<Vec<(String, Instant)>>,
        spoken: Mutex<Vec<String>>,
        settings_seen: Mutex<Vec<VoiceSettings>>,
        cancels: Mutex<u32>,
        voices: Mutex<Vec<Voice>>,
        voice_tx: Option<broadcast::Sender<()>>,
    }

    impl ScriptedBackend {
        fn with_play_time(play_time: Duration) -> Self {
            Self {
                play_time,
                ..Self::default()
            }
        }

        fn fail(&self, text: &str, failures: Vec<SpeechFailure>) {
            self.failures
                .lock()
                .unwrap()
                .insert(text.to_owned(), failures.into());
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .map(|(t, _)| t.clone())
                .collect()
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpeechBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechFailure> {
            self.attempts
                .lock()
                .unwrap()
                .push((utterance.text.clone(), Instant::now()));
            self.settings_seen
                .lock()
                .unwrap()
                .push(utterance.settings.clone());
            let scripted = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&utterance.text)
                .and_then(VecDeque::pop_front);
            if let Some(failure) = scripted {
                return Err(failure);
            }
            tokio::time::sleep(self.play_time).await;
            self.spoken.lock().unwrap().push(utterance.text.clone());
            Ok(())
        }

        fn cancel(&self) {
            *self.cancels.lock().unwrap() += 1;
        }

        async fn voices(&self) -> Vec<Voice> {
            self.voices.lock().unwrap().clone()
        }

        fn voice_events(&self) -> Option<broadcast::Receiver<()>> {
            self.voice_tx.as_ref().map(broadcast::Sender::subscribe)
        }
    }

    fn chunks(texts: &[&str]) -> Vec<SpeechChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| SpeechChunk {
                seq: i as u64,
                text: (*t).to_owned(),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn plays_chunks_in_order() {
        let backend = Arc::new(ScriptedBackend::with_play_time(Duration::from_millis(50)));
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        scheduler.enqueue(chunks(&["one", "two", "three"]));
        assert!(scheduler.is_busy());
        scheduler.wait_idle().await;

        assert_eq!(backend.spoken(), vec!["one", "two", "three"]);
        assert!(!scheduler.is_busy());
        assert_eq!(scheduler.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_continues() {
        let backend = Arc::new(ScriptedBackend::with_play_time(Duration::from_millis(10)));
        backend.fail(
            "two",
            vec![
                SpeechFailure::SynthesisFailed("busy".into()),
                SpeechFailure::Network("offline".into()),
            ],
        );
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        scheduler.enqueue(chunks(&["one", "two", "three"]));
        scheduler.wait_idle().await;

        assert_eq!(backend.spoken(), vec!["one", "two", "three"]);
        assert_eq!(backend.attempts(), vec!["one", "two", "two", "two", "three"]);

        let attempts = backend.attempts.lock().unwrap().clone();
        let first_try = attempts[1].1;
        let last_try = attempts[3].1;
        assert!(last_try - first_try >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn drops_chunk_after_retry_limit() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.fail(
            "bad",
            vec![
                SpeechFailure::Network("1".into()),
                SpeechFailure::Network("2".into()),
                SpeechFailure::Network("3".into()),
            ],
        );
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        scheduler.enqueue(chunks(&["bad", "good"]));
        scheduler.wait_idle().await;

        assert_eq!(backend.attempts(), vec!["bad", "bad", "bad", "good"]);
        assert_eq!(backend.spoken(), vec!["good"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_skips_without_retry() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.fail("broken", vec![SpeechFailure::Other("no voice".into())]);
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        let start = Instant::now();
        scheduler.enqueue(chunks(&["broken", "fine"]));
        scheduler.wait_idle().await;

        assert_eq!(backend.attempts(), vec!["broken", "fine"]);
        assert!(Instant::now() - start >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn suppressed_failure_goes_idle_and_keeps_queue() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.fail("first", vec![SpeechFailure::Interrupted]);
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        scheduler.enqueue(chunks(&["first", "second"]));
        scheduler.wait_idle().await;

        assert_eq!(backend.attempts(), vec!["first"]);
        assert_eq!(scheduler.queued(), 1);

        // New work resumes the queue.
        scheduler.enqueue(chunks(&["third"]));
        scheduler.wait_idle().await;
        assert_eq!(backend.spoken(), vec!["second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_idle_is_a_no_op() {
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        scheduler.stop();
        scheduler.stop();

        assert!(!scheduler.is_busy());
        assert_eq!(scheduler.queued(), 0);
        assert_eq!(*backend.cancels.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_utterance_cancels_and_clears() {
        let backend = Arc::new(ScriptedBackend::with_play_time(Duration::from_secs(5)));
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        scheduler.enqueue(chunks(&["long", "after", "later"]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.attempts(), vec!["long"]);

        scheduler.stop();
        assert!(!scheduler.is_busy());
        assert_eq!(scheduler.queued(), 0);
        assert_eq!(*backend.cancels.lock().unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(backend.spoken().is_empty());
        assert_eq!(backend.attempts(), vec!["long"]);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_after_stop_plays_new_generation() {
        let backend = Arc::new(ScriptedBackend::with_play_time(Duration::from_millis(200)));
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        scheduler.enqueue(chunks(&["old one", "old two"]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop();
        scheduler.enqueue(chunks(&["new"]));
        scheduler.wait_idle().await;

        assert_eq!(backend.spoken(), vec!["new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_retry_delay_resets_counter() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.fail(
            "flaky",
            vec![
                SpeechFailure::Network("1".into()),
                SpeechFailure::Network("2".into()),
            ],
        );
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        scheduler.enqueue(chunks(&["flaky"]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop();
        assert_eq!(scheduler.queued(), 0);

        scheduler.enqueue(chunks(&["flaky"]));
        scheduler.wait_idle().await;
        // One scripted failure left; a fresh counter allows the retry.
        assert_eq!(backend.spoken(), vec!["flaky"]);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_flow_into_utterances() {
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());
        scheduler.set_voice_settings(VoiceSettings {
            voice: Some("en-gb".into()),
            rate: 3.0,
            pitch: 1.2,
            volume: 0.5,
        });

        scheduler.enqueue(chunks(&["hello"]));
        scheduler.wait_idle().await;

        let seen = backend.settings_seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].voice.as_deref(), Some("en-gb"));
        assert_eq!(seen[0].rate, 2.0);
        assert_eq!(seen[0].volume, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_selects_default_voice() {
        let backend = ScriptedBackend::default();
        let mut preferred = Voice::new("en-us", "en-US");
        preferred.is_default = true;
        *backend.voices.lock().unwrap() = vec![Voice::new("de", "de-DE"), preferred];
        let scheduler = PlaybackScheduler::new(Arc::new(backend), RetryPolicy::default());

        let voices = scheduler.refresh_voices().await;
        assert_eq!(voices.len(), 2);
        assert_eq!(scheduler.voice_settings().voice.as_deref(), Some("en-us"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_keeps_explicit_voice() {
        let backend = ScriptedBackend::default();
        *backend.voices.lock().unwrap() = vec![Voice::new("de", "de-DE")];
        let scheduler = PlaybackScheduler::with_settings(
            Arc::new(backend),
            RetryPolicy::default(),
            VoiceSettings {
                voice: Some("fr".into()),
                ..VoiceSettings::default()
            },
        );

        scheduler.refresh_voices().await;
        assert_eq!(scheduler.voice_settings().voice.as_deref(), Some("fr"));
        assert_eq!(scheduler.voices().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn voice_events_trigger_refresh() {
        let (tx, _rx) = broadcast::channel(4);
        let backend = Arc::new(ScriptedBackend {
            voice_tx: Some(tx.clone()),
            ..ScriptedBackend::default()
        });
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scheduler.voices().is_empty());

        *backend.voices.lock().unwrap() = vec![Voice::new("late", "en-US")];
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(scheduler.voices().len(), 1);
        assert_eq!(scheduler.voice_settings().voice.as_deref(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn voice_refresh_leaves_in_flight_utterance_alone() {
        let (tx, _rx) = broadcast::channel(4);
        let backend = Arc::new(ScriptedBackend {
            play_time: Duration::from_secs(1),
            voice_tx: Some(tx.clone()),
            ..ScriptedBackend::default()
        });
        let scheduler = PlaybackScheduler::new(backend.clone(), RetryPolicy::default());

        scheduler.enqueue(chunks(&["long"]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        *backend.voices.lock().unwrap() = vec![Voice::new("late", "en-US")];
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(scheduler.voice_settings().voice.as_deref(), Some("late"));
        assert_eq!(backend.attempts(), vec!["long"]);
        assert!(backend.spoken().is_empty());
        assert!(scheduler.is_busy());

        scheduler.wait_idle().await;
        assert_eq!(backend.spoken(), vec!["long"]);
        assert_eq!(backend.attempts(), vec!["long"]);
        assert_eq!(*backend.cancels.lock().unwrap(), 0);

        scheduler.enqueue(chunks(&["next"]));
        scheduler.wait_idle().await;
        let seen = backend.settings_seen.lock().unwrap().clone();
        assert_eq!(seen[0].voice, None);
        assert_eq!(seen[1].voice.as_deref(), Some("late"));
    }

    /// Backend that, like the command backend, can only cancel whatever it
    /// started last. `cancel` is slow so a racing `enqueue` has time to run.
    #[derive(Default)]
    struct LatestOnlyBackend {
        current: Mutex<CancellationToken>,
        attempts: Mutex<Vec<String>>,
        spoken: Mutex<Vec<String>>,
        cancel_entered: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SpeechBackend for LatestOnlyBackend {
        fn name(&self) -> &str {
            "latest-only"
        }

        async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechFailure> {
            let token = {
                let mut current = self.current.lock().unwrap();
                *current = CancellationToken::new();
                current.clone()
            };
            self.attempts.lock().unwrap().push(utterance.text.clone());
            let play = if utterance.text == "old" {
                Duration::from_secs(10)
            } else {
                Duration::from_millis(10)
            };
            tokio::select! {
                _ = token.cancelled() => Err(SpeechFailure::Canceled),
                _ = tokio::time::sleep(play) => {
                    self.spoken.lock().unwrap().push(utterance.text.clone());
                    Ok(())
                }
            }
        }

        fn cancel(&self) {
            self.cancel_entered
                .store(true, std::sync::atomic::Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.current.lock().unwrap().cancel();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn enqueue_racing_stop_is_not_cancelled() {
        let backend = Arc::new(LatestOnlyBackend::default());
        let scheduler = Arc::new(PlaybackScheduler::new(
            backend.clone(),
            RetryPolicy::default(),
        ));

        scheduler.enqueue(chunks(&["old"]));
        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.attempts.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("old should start");

        let stopper = {
            let scheduler = Arc::clone(&scheduler);
            tokio::task::spawn_blocking(move || scheduler.stop())
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while !backend
                .cancel_entered
                .load(std::sync::atomic::Ordering::SeqCst)
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("stop should reach the backend");

        scheduler.enqueue(chunks(&["fresh"]));
        stopper.await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
            .await
            .expect("fresh should finish");

        assert_eq!(*backend.spoken.lock().unwrap(), vec!["fresh"]);
        assert_eq!(*backend.attempts.lock().unwrap(), vec!["old", "fresh"]);
    }
}
