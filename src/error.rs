//! Error types shared across the reader.
//!
//! Each collaborator boundary has its own error enum; `ReaderError` is what
//! the control surface hands back to callers.

use std::path::PathBuf;

use thiserror::Error;

/// The source document could not be turned into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported document type: {0}")]
    Unsupported(String),
    #[error("malformed document {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("document contains no readable text")]
    Empty,
}

/// Synthesis engine failures. The pipeline only distinguishes success from
/// failure; the variants exist for logging.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("TTS synthesis error: {0}")]
    Synthesis(String),
    #[error("TTS network error: {0}")]
    Network(String),
    #[error("TTS engine not ready: {0}")]
    NotReady(String),
}

/// A batch could not be stitched into one artifact.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StitchError {
    #[error("batch has no chunk audio")]
    EmptyBatch,
    #[error("chunk {position} of the batch has no samples")]
    EmptyChunk { position: usize },
    #[error("sample rate mismatch: expected {expected} Hz, chunk {position} is {found} Hz")]
    SampleRateMismatch {
        expected: u32,
        found: u32,
        position: usize,
    },
}

/// Temporary artifact bookkeeping failed. Logged, never fatal to playback.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("artifact I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("artifact store already released")]
    Closed,
}

/// The audio sink could not play an artifact.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no audio output available: {0}")]
    Device(String),
    #[error("playback failed: {0}")]
    Playback(String),
}

/// Errors surfaced by the reader control surface.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}
