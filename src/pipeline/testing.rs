//! Test doubles: a scripted TTS engine and an in-memory audio sink.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{AudioBuffer, CancelFlag, PlaybackState, Reader, VoiceParams};
use crate::error::{SinkError, TtsError};
use crate::tts::{AudioSink, PlaybackOutcome, TtsEngine, KOKORO_SAMPLE_RATE};

/// Samples emitted per input byte by `ScriptedEngine`.
const SAMPLES_PER_BYTE: usize = 8;

/// Deterministic engine: audio is derived from the text bytes, so every
/// chunk has distinct, reproducible samples. Delays and failures can be
/// scripted per text fragment.
#[derive(Default)]
pub struct ScriptedEngine {
    delays: Mutex<HashMap<String, Duration>>,
    /// Fragment -> number of calls that should still fail (`u32::MAX` = always).
    failures: Mutex<HashMap<String, u32>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(self, fragment: &str, delay: Duration) -> Self {
        self.delays
            .lock()
            .unwrap()
            .insert(fragment.to_string(), delay);
        self
    }

    pub fn fail_times(self, fragment: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(fragment.to_string(), times);
        self
    }

    pub fn fail_always(self, fragment: &str) -> Self {
        self.fail_times(fragment, u32::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// The audio this engine produces for `text`.
    pub fn render(text: &str) -> AudioBuffer {
        let samples = text
            .bytes()
            .flat_map(|b| std::iter::repeat(b as f32 / 255.0).take(SAMPLES_PER_BYTE))
            .collect();
        AudioBuffer::new(samples, KOKORO_SAMPLE_RATE)
    }

    fn delay_for(&self, text: &str) -> Option<Duration> {
        let delays = self.delays.lock().unwrap();
        delays
            .iter()
            .find(|(fragment, _)| text.contains(fragment.as_str()))
            .map(|(_, d)| *d)
    }

    fn should_fail(&self, text: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        for (fragment, remaining) in failures.iter_mut() {
            if text.contains(fragment.as_str()) && *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return true;
            }
        }
        false
    }
}

impl TtsEngine for ScriptedEngine {
    fn synthesize(
        &self,
        text: &str,
        _params: &VoiceParams,
    ) -> Pin<Box<dyn Future<Output = Result<AudioBuffer, TtsError>> + Send + '_>> {
        let text = text.to_string();
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delay_for(&text) {
                tokio::time::sleep(delay).await;
            } else {
                tokio::task::yield_now().await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.should_fail(&text) {
                return Err(TtsError::Synthesis(format!("scripted failure for {:?}", text)));
            }
            Ok(Self::render(&text))
        })
    }

    fn name(&self) -> String {
        "scripted".into()
    }
}

/// Samples "played" per slice by `MemorySink`.
const SLICE: usize = 64;

/// Sink that plays into memory, one slice per `slice_delay`, honouring
/// pause, resume and stop the way a device sink would.
pub struct MemorySink {
    slice_delay: Duration,
    played: Mutex<Vec<f32>>,
    artifacts: Mutex<Vec<usize>>,
    paused: AtomicBool,
    stopped: AtomicBool,
    playing: AtomicBool,
    overlapping_plays: AtomicUsize,
}

impl MemorySink {
    pub fn new(slice_delay: Duration) -> Self {
        Self {
            slice_delay,
            played: Mutex::new(Vec::new()),
            artifacts: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            overlapping_plays: AtomicUsize::new(0),
        }
    }

    pub fn fast() -> Self {
        Self::new(Duration::from_micros(50))
    }

    pub fn played(&self) -> Vec<f32> {
        self.played.lock().unwrap().clone()
    }

    /// Length of every artifact handed to `play`, in call order.
    pub fn artifact_lengths(&self) -> Vec<usize> {
        self.artifacts.lock().unwrap().clone()
    }

    pub fn overlapping_plays(&self) -> usize {
        self.overlapping_plays.load(Ordering::SeqCst)
    }
}

impl AudioSink for MemorySink {
    fn play(&self, audio: &AudioBuffer, cancel: &CancelFlag) -> Result<PlaybackOutcome, SinkError> {
        if self.playing.swap(true, Ordering::SeqCst) {
            self.overlapping_plays.fetch_add(1, Ordering::SeqCst);
        }
        self.stopped.store(false, Ordering::SeqCst);
        self.artifacts.lock().unwrap().push(audio.len());

        let mut outcome = PlaybackOutcome::Finished;
        let mut position = 0;
        while position < audio.len() {
            if cancel.is_cancelled() || self.stopped.load(Ordering::SeqCst) {
                outcome = PlaybackOutcome::Stopped;
                break;
            }
            if self.paused.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            let end = (position + SLICE).min(audio.len());
            self.played
                .lock()
                .unwrap()
                .extend_from_slice(&audio.samples()[position..end]);
            position = end;
            std::thread::sleep(self.slice_delay);
        }

        self.playing.store(false, Ordering::SeqCst);
        Ok(outcome)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }
}

/// Poll the reader until it reaches `state` or the timeout elapses.
pub async fn wait_for_state(reader: &Reader, state: PlaybackState, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if reader.state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    reader.state() == state
}

/// Shared handles so tests can keep inspecting the doubles after handing
/// them to a `Reader`.
pub fn doubles(engine: ScriptedEngine, sink: MemorySink) -> (Arc<ScriptedEngine>, Arc<MemorySink>) {
    (Arc::new(engine), Arc::new(sink))
}
