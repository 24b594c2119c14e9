//! Batched synthesis pipeline: text -> chunks -> parallel TTS -> ordered
//! batches -> stitched artifacts -> sequential playback.
//!
//! The stages, in data-flow order:
//! - `segment`: sentences -> chunks -> batches
//! - `queue`: bounded generation queue (back-pressure on the feeder)
//! - `worker`: fixed-size worker pool calling the TTS engine
//! - `assembler`: collects out-of-order chunk results per batch
//! - `stitch`: joins a batch's chunk audio with inter-chunk silence
//! - `artifacts`: temporary WAV files owned by one session
//! - `controller`: playback state machine
//! - `progress`: counters and broadcast events for observers
//! - `session`: the `Reader` control surface wiring it all together

pub mod artifacts;
pub mod assembler;
pub mod controller;
pub mod progress;
pub mod queue;
pub mod segment;
pub mod session;
pub mod stitch;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use controller::PlaybackState;
pub use progress::{ProgressSnapshot, ReaderEvent};
pub use session::{DocumentSource, Reader};

// ── Audio ───────────────────────────────────────────────────────────

/// Immutable mono PCM audio at a fixed sample rate.
///
/// Cloning shares the underlying samples, so a buffer can be handed to the
/// stitcher while still being referenced elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

// ── Text units ──────────────────────────────────────────────────────

/// Smallest unit of text submitted to the TTS engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position within the document.
    pub index: usize,
    /// Batch this chunk belongs to.
    pub batch_index: usize,
    pub text: String,
}

/// An ordered group of chunks that is stitched and played as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub index: usize,
    /// Chunk indices in document order.
    pub chunk_indices: Vec<usize>,
}

/// One chunk waiting for synthesis.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    pub chunk: Chunk,
    pub attempt_count: u32,
}

impl GenerationTask {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            attempt_count: 0,
        }
    }
}

/// Terminal outcome of generating one chunk.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Success(AudioBuffer),
    Failure(String),
}

/// Exactly one of these is produced per chunk.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub batch_index: usize,
    pub outcome: ChunkOutcome,
}

/// Completion state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Ready,
    Failed,
}

/// A stitched batch handed from the assembler to the controller.
#[derive(Debug, Clone)]
pub struct StitchedBatch {
    pub index: usize,
    pub chunk_indices: Vec<usize>,
    pub audio: AudioBuffer,
}

/// What the controller receives for each batch, exactly once.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Ready(StitchedBatch),
    Failed { index: usize, reason: String },
}

impl BatchOutcome {
    pub fn index(&self) -> usize {
        match self {
            Self::Ready(batch) => batch.index,
            Self::Failed { index, .. } => *index,
        }
    }
}

/// Voice parameters applied to every chunk of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub voice: String,
    pub speed: f32,
}

/// Accepted range for the speed factor.
pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

impl VoiceParams {
    /// Build parameters, clamping speed into the engine's accepted range.
    pub fn new(voice: &str, speed: f32) -> Self {
        let speed = if speed.is_finite() { speed } else { 1.0 };
        Self {
            voice: voice.to_string(),
            speed: speed.clamp(MIN_SPEED, MAX_SPEED),
        }
    }
}

// ── Cancellation ────────────────────────────────────────────────────

/// Cooperative cancellation flag shared by every task of one session.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
