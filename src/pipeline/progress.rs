//! Progress counters and observer events.
//!
//! Counters are plain atomics and events go out on a broadcast channel, so
//! producers never wait on observers. A lagging subscriber loses events; it
//! can always recover the current picture from `snapshot()`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use super::controller::{PlaybackState, StateCell};

/// Capacity of the observer event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Point-in-time view of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub chunks_done: usize,
    pub chunks_total: usize,
    pub batches_done: usize,
    pub current_batch: usize,
    pub batches_total: usize,
    pub state: PlaybackState,
}

impl ProgressSnapshot {
    /// Snapshot for when no session exists.
    pub fn idle() -> Self {
        Self {
            chunks_done: 0,
            chunks_total: 0,
            batches_done: 0,
            current_batch: 0,
            batches_total: 0,
            state: PlaybackState::Idle,
        }
    }

    /// Fraction of batches played, in [0, 1].
    pub fn fraction_played(&self) -> f64 {
        if self.batches_total == 0 {
            return 0.0;
        }
        (self.current_batch.min(self.batches_total)) as f64 / self.batches_total as f64
    }
}

/// Events published while a session runs.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum ReaderEvent {
    StateChange {
        state: PlaybackState,
    },
    ChunkDone {
        chunk_index: usize,
        batch_index: usize,
        chunks_done: usize,
        chunks_total: usize,
    },
    ChunkFailed {
        chunk_index: usize,
        batch_index: usize,
        reason: String,
    },
    BatchReady {
        batch_index: usize,
    },
    BatchFailed {
        batch_index: usize,
        reason: String,
    },
    BatchStarted {
        batch_index: usize,
        batches_total: usize,
    },
    BatchFinished {
        batch_index: usize,
    },
    Completed {},
    Failed {
        batch_index: usize,
        reason: String,
    },
    Stopped {},
}

/// Passive aggregator for one session.
#[derive(Debug)]
pub struct ProgressReporter {
    chunks_done: AtomicUsize,
    chunks_total: usize,
    batches_done: AtomicUsize,
    batches_total: usize,
    current_batch: AtomicUsize,
    state: Arc<StateCell>,
    events: broadcast::Sender<ReaderEvent>,
}

impl ProgressReporter {
    pub fn new(
        chunks_total: usize,
        batches_total: usize,
        state: Arc<StateCell>,
        events: broadcast::Sender<ReaderEvent>,
    ) -> Self {
        Self {
            chunks_done: AtomicUsize::new(0),
            chunks_total,
            batches_done: AtomicUsize::new(0),
            batches_total,
            current_batch: AtomicUsize::new(0),
            state,
            events,
        }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ReaderEvent) {
        let _ = self.events.send(event);
    }

    pub fn chunk_succeeded(&self, chunk_index: usize, batch_index: usize) {
        let done = self.chunks_done.fetch_add(1, Ordering::AcqRel) + 1;
        self.emit(ReaderEvent::ChunkDone {
            chunk_index,
            batch_index,
            chunks_done: done,
            chunks_total: self.chunks_total,
        });
    }

    pub fn chunk_failed(&self, chunk_index: usize, batch_index: usize, reason: &str) {
        self.emit(ReaderEvent::ChunkFailed {
            chunk_index,
            batch_index,
            reason: reason.to_string(),
        });
    }

    pub fn batch_ready(&self, batch_index: usize) {
        self.batches_done.fetch_add(1, Ordering::AcqRel);
        self.emit(ReaderEvent::BatchReady { batch_index });
    }

    pub fn batch_failed(&self, batch_index: usize, reason: &str) {
        self.emit(ReaderEvent::BatchFailed {
            batch_index,
            reason: reason.to_string(),
        });
    }

    pub fn set_current_batch(&self, batch_index: usize) {
        self.current_batch.store(batch_index, Ordering::Release);
    }

    pub fn batches_total(&self) -> usize {
        self.batches_total
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            chunks_done: self.chunks_done.load(Ordering::Acquire),
            chunks_total: self.chunks_total,
            batches_done: self.batches_done.load(Ordering::Acquire),
            current_batch: self.current_batch.load(Ordering::Acquire),
            batches_total: self.batches_total,
            state: self.state.load(),
        }
    }
}
