//! espeak-ng command-line engine.
//!
//! Runs `espeak-ng --stdout` on a blocking thread and decodes the WAV it
//! writes. Voice is passed through as the espeak voice name (e.g. "en-us");
//! speed maps linearly onto words per minute.

use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Command;

use tracing::debug;

use super::TtsEngine;
use crate::error::TtsError;
use crate::pipeline::{AudioBuffer, VoiceParams};

/// espeak-ng default speaking rate at speed 1.0.
const BASE_WPM: f32 = 175.0;

pub struct EspeakTts {
    binary: PathBuf,
}

impl EspeakTts {
    pub fn with_binary(binary: &Path) -> Self {
        Self {
            binary: binary.to_path_buf(),
        }
    }

    /// Find espeak-ng (or espeak) on PATH.
    pub fn detect() -> anyhow::Result<Self> {
        ["espeak-ng", "espeak"]
            .iter()
            .find_map(|bin| find_on_path(bin))
            .map(|binary| Self { binary })
            .ok_or_else(|| anyhow::anyhow!("espeak-ng not found on PATH"))
    }

    fn run(binary: &Path, text: &str, params: &VoiceParams) -> Result<AudioBuffer, TtsError> {
        let wpm = (BASE_WPM * params.speed).round() as u32;
        let output = Command::new(binary)
            .args(["--stdout", "-q", "-v", &params.voice, "-s", &wpm.to_string()])
            .arg(text)
            .output()
            .map_err(|e| {
                TtsError::NotReady(format!("{} failed to execute: {}", binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TtsError::Synthesis(format!(
                "espeak-ng failed: {}",
                stderr.trim()
            )));
        }

        decode_wav(&output.stdout)
    }
}

impl TtsEngine for EspeakTts {
    fn synthesize(
        &self,
        text: &str,
        params: &VoiceParams,
    ) -> Pin<Box<dyn Future<Output = Result<AudioBuffer, TtsError>> + Send + '_>> {
        let text = text.to_string();
        let params = params.clone();
        let binary = self.binary.clone();
        Box::pin(async move {
            debug!(voice = %params.voice, text_len = text.len(), "espeak-ng synthesis");
            tokio::task::spawn_blocking(move || Self::run(&binary, &text, &params))
                .await
                .map_err(|e| TtsError::Synthesis(format!("espeak-ng task panicked: {}", e)))?
        })
    }

    fn name(&self) -> String {
        format!("espeak-ng ({})", self.binary.display())
    }
}

/// Decode a mono or multi-channel WAV into mono f32 samples.
///
/// espeak-ng writes a streaming header whose data length is left as
/// 0xFFFFFFFF, so samples are read until the reader runs dry.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer, TtsError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| TtsError::Synthesis(format!("invalid WAV output: {}", e)))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().map_while(Result::ok).collect(),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map_while(Result::ok)
                .map(|s| s as f32 / scale)
                .collect()
        }
    };

    let samples: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    if samples.is_empty() {
        return Err(TtsError::Synthesis("engine produced no audio".into()));
    }
    Ok(AudioBuffer::new(samples, spec.sample_rate))
}

fn find_on_path(bin: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}
