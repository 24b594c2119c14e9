//! Audio playback via rodio.
//!
//! `AudioSink` is the contract the playback controller drives: one blocking
//! `play` call per batch artifact, with pause/resume/stop callable from any
//! other thread while it runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};

use crate::error::SinkError;
use crate::pipeline::{AudioBuffer, CancelFlag};

/// How often the blocking play loop checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why a `play` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The artifact played to its end.
    Finished,
    /// Playback was interrupted by `stop` or session cancellation.
    Stopped,
}

/// An audio output that plays one artifact at a time.
pub trait AudioSink: Send + Sync {
    /// Play the buffer, blocking until it ends or is stopped.
    ///
    /// Must return `Stopped` promptly once `cancel` is set.
    fn play(&self, audio: &AudioBuffer, cancel: &CancelFlag) -> Result<PlaybackOutcome, SinkError>;

    /// Pause at the current position. No-op when nothing is playing.
    fn pause(&self);

    /// Continue from the paused position. No-op when not paused.
    fn resume(&self);

    /// Stop current playback immediately.
    fn stop(&self);
}

/// Plays f32 PCM through the configured or default output device.
pub struct RodioSink {
    output_device: Option<String>,
    volume: f32,
    active: Mutex<Option<Arc<Sink>>>,
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl RodioSink {
    pub fn new(output_device: Option<String>, volume: f32) -> Self {
        Self {
            output_device,
            volume: volume.clamp(0.0, 2.0),
            active: Mutex::new(None),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    fn with_active(&self, f: impl FnOnce(&Sink)) {
        match self.active.lock() {
            Ok(guard) => {
                if let Some(sink) = guard.as_ref() {
                    f(sink);
                }
            }
            Err(e) => tracing::error!("Failed to lock active sink: {}", e),
        }
    }

    /// Publish `sink` as the one pause/resume/stop act on, then apply a
    /// pause that arrived before it existed.
    fn activate(&self, sink: &Arc<Sink>) {
        self.set_active(Some(Arc::clone(sink)));
        if self.paused.load(Ordering::SeqCst) {
            sink.pause();
        }
    }

    fn set_active(&self, sink: Option<Arc<Sink>>) {
        match self.active.lock() {
            Ok(mut guard) => *guard = sink,
            Err(e) => tracing::error!("Failed to lock active sink: {}", e),
        }
    }
}

impl AudioSink for RodioSink {
    fn play(&self, audio: &AudioBuffer, cancel: &CancelFlag) -> Result<PlaybackOutcome, SinkError> {
        if audio.is_empty() {
            return Ok(PlaybackOutcome::Finished);
        }
        if cancel.is_cancelled() {
            return Ok(PlaybackOutcome::Stopped);
        }

        // The stream is !Send, so it lives on this (blocking) thread only.
        let (_stream, stream_handle) = open_output_stream(self.output_device.as_deref())?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| SinkError::Device(format!("Failed to create audio sink: {}", e)))?;
        sink.set_volume(self.volume);
        let sink = Arc::new(sink);
        self.stopped.store(false, Ordering::SeqCst);
        self.activate(&sink);
        sink.append(SamplesBuffer::new(
            1,
            audio.sample_rate(),
            audio.samples().to_vec(),
        ));

        while !sink.empty() {
            if cancel.is_cancelled() || self.stopped.load(Ordering::SeqCst) {
                tracing::info!("Playback cancelled");
                sink.stop();
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        self.set_active(None);

        if cancel.is_cancelled() || self.stopped.load(Ordering::SeqCst) {
            return Ok(PlaybackOutcome::Stopped);
        }

        sink.sleep_until_end();
        Ok(PlaybackOutcome::Finished)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.with_active(|sink| sink.pause());
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.with_active(|sink| sink.play());
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.with_active(|sink| sink.stop());
    }
}

/// Open the audio output stream for a named or default device.
fn open_output_stream(
    output_device_name: Option<&str>,
) -> Result<(OutputStream, OutputStreamHandle), SinkError> {
    if let Some(name) = output_device_name {
        let host = cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| SinkError::Device(format!("Failed to enumerate output devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));

        match device {
            Some(dev) => {
                tracing::info!(device = %name, "Using configured output device");
                return OutputStream::try_from_device(&dev).map_err(|e| {
                    SinkError::Device(format!("Failed to open output device '{}': {}", name, e))
                });
            }
            None => {
                tracing::warn!(
                    device = %name,
                    "Configured output device not found, falling back to default"
                );
            }
        }
    }

    OutputStream::try_default().map_err(|e| SinkError::Device(e.to_string()))
}
