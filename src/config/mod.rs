//! Configuration reading and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::queue::DEFAULT_QUEUE_CAPACITY;
use crate::pipeline::segment::{DEFAULT_CHUNKS_PER_BATCH, DEFAULT_SENTENCES_PER_CHUNK};
use crate::pipeline::stitch::DEFAULT_SILENCE_MS;
use crate::pipeline::worker::{DEFAULT_MAX_RETRIES, DEFAULT_MAX_WORKERS};

pub use paths::{get_config_path, get_data_dir, get_log_dir};

/// Batches the feeder may enqueue ahead of the playback pointer.
pub const DEFAULT_LOOKAHEAD_BATCHES: usize = 2;
pub const DEFAULT_VOICE: &str = "am_echo";
pub const DEFAULT_SPEED: f32 = 1.1;

/// reader_config.json shape. Every field is optional on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaderConfig {
    pub sentences_per_chunk: usize,
    pub chunks_per_batch: usize,
    /// Worker count; `None` = detected parallelism.
    pub workers: Option<usize>,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub lookahead_batches: usize,
    pub silence_ms: u64,
    pub max_retries: u32,
    pub voice: String,
    pub speed: f32,
    /// Root for per-session artifact directories; `None` = system temp.
    pub temp_dir: Option<PathBuf>,
    pub engine: EngineConfig,
    pub volume: f32,
    pub output_device: Option<String>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            sentences_per_chunk: DEFAULT_SENTENCES_PER_CHUNK,
            chunks_per_batch: DEFAULT_CHUNKS_PER_BATCH,
            workers: None,
            max_workers: DEFAULT_MAX_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            lookahead_batches: DEFAULT_LOOKAHEAD_BATCHES,
            silence_ms: DEFAULT_SILENCE_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            voice: DEFAULT_VOICE.to_string(),
            speed: DEFAULT_SPEED,
            temp_dir: None,
            engine: EngineConfig::default(),
            volume: 1.0,
            output_device: None,
        }
    }
}

impl ReaderConfig {
    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    /// Where session directories are created.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(paths::APP_DIR))
    }
}

/// Synthesis engine selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// "http" or "espeak".
    pub adapter: String,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// espeak-ng binary; detected on PATH when unset.
    pub binary: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            adapter: "http".into(),
            endpoint: None,
            model: None,
            api_key: None,
            binary: None,
        }
    }
}

/// Read reader_config.json from the data directory, falling back to defaults.
pub fn read_reader_config() -> ReaderConfig {
    read_reader_config_from(&get_config_path())
}

pub fn read_reader_config_from(path: &Path) -> ReaderConfig {
    read_json_file(path).unwrap_or_default()
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
