//! Temporary WAV artifacts owned by one session.
//!
//! Layout: `<temp_root>/session-<uuid>/chunk_<n>.wav` and `batch_<n>.wav`.
//! Each file is deleted exactly once: when its batch finishes playing, or on
//! teardown, whichever comes first. Dropping the store tears it down.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};
use uuid::Uuid;

use super::AudioBuffer;
use crate::error::ResourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
    Chunk(usize),
    Batch(usize),
}

impl ArtifactKey {
    fn file_name(self) -> String {
        match self {
            Self::Chunk(n) => format!("chunk_{}.wav", n),
            Self::Batch(n) => format!("batch_{}.wav", n),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<ArtifactKey, PathBuf>,
    closed: bool,
}

#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

impl ArtifactStore {
    /// Create the session directory under `base`.
    pub fn create(base: &Path, session_id: Uuid) -> Result<Self, ResourceError> {
        let dir = base.join(format!("session-{}", session_id));
        fs::create_dir_all(&dir).map_err(|source| ResourceError::Io {
            path: dir.clone(),
            source,
        })?;
        debug!(dir = %dir.display(), "Created artifact directory");
        Ok(Self {
            dir,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_chunk(&self, index: usize, audio: &AudioBuffer) -> Result<PathBuf, ResourceError> {
        self.write(ArtifactKey::Chunk(index), audio)
    }

    pub fn write_batch(&self, index: usize, audio: &AudioBuffer) -> Result<PathBuf, ResourceError> {
        self.write(ArtifactKey::Batch(index), audio)
    }

    fn write(&self, key: ArtifactKey, audio: &AudioBuffer) -> Result<PathBuf, ResourceError> {
        if self.lock().closed {
            return Err(ResourceError::Closed);
        }

        let path = self.dir.join(key.file_name());
        write_wav(&path, audio)?;

        let mut inner = self.lock();
        if inner.closed {
            // Torn down while we were writing.
            remove_file(&path);
            return Err(ResourceError::Closed);
        }
        inner.files.insert(key, path.clone());
        Ok(path)
    }

    /// Delete a played batch's artifact and its chunk artifacts.
    pub fn release_batch(&self, batch_index: usize, chunk_indices: &[usize]) {
        let released: Vec<PathBuf> = {
            let mut inner = self.lock();
            std::iter::once(ArtifactKey::Batch(batch_index))
                .chain(chunk_indices.iter().map(|&i| ArtifactKey::Chunk(i)))
                .filter_map(|key| inner.files.remove(&key))
                .collect()
        };
        for path in &released {
            remove_file(path);
        }
        debug!(batch = batch_index, files = released.len(), "Released batch artifacts");
    }

    /// Delete every artifact and the session directory. Idempotent.
    pub fn release_all(&self) {
        let released: Vec<PathBuf> = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.files.drain().map(|(_, path)| path).collect()
        };
        for path in &released {
            remove_file(path);
        }
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove artifact directory");
            }
        }
        debug!(files = released.len(), "Released all session artifacts");
    }

    /// Number of artifacts currently on disk.
    pub fn live_count(&self) -> usize {
        self.lock().files.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ArtifactStore {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn write_wav(path: &Path, audio: &AudioBuffer) -> Result<(), ResourceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let wav_err = |source| ResourceError::Wav {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in audio.samples() {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)
}

fn remove_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete artifact");
        }
    }
}
