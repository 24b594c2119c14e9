//! Narrator core: reads documents aloud.
//!
//! Text is split into sentence chunks, synthesized in parallel by a worker
//! pool, reassembled into ordered batches, stitched with short pauses and
//! played back one batch at a time while later batches are still being
//! generated.

pub mod config;
pub mod error;
pub mod extract;
pub mod ipc;
pub mod logger;
pub mod pipeline;
pub mod tts;

pub use pipeline::{DocumentSource, PlaybackState, ProgressSnapshot, Reader, ReaderEvent};
