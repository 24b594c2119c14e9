//! Text-to-Speech adapters and playback.
//!
//! Provides a common `TtsEngine` trait with implementations for:
//! - OpenAI-compatible speech endpoints (cloud, or a local Kokoro server)
//! - espeak-ng via its command line
//!
//! and the `AudioSink` playback abstraction with a rodio implementation.

pub mod espeak;
pub mod http;
pub mod playback;

use std::future::Future;
use std::pin::Pin;

use crate::config::EngineConfig;
use crate::error::TtsError;
use crate::pipeline::{AudioBuffer, VoiceParams};

pub use espeak::EspeakTts;
pub use http::HttpTts;
pub use playback::{AudioSink, PlaybackOutcome, RodioSink};

/// Output rate of Kokoro-family engines.
pub const KOKORO_SAMPLE_RATE: u32 = 24_000;

/// Common trait for all TTS engines (dyn-compatible).
///
/// One call synthesizes one chunk. Engines are shared by every worker of
/// the pool, so implementations must tolerate concurrent calls.
pub trait TtsEngine: Send + Sync {
    /// Synthesize text to mono PCM audio at the engine's native sample rate.
    fn synthesize(
        &self,
        text: &str,
        params: &VoiceParams,
    ) -> Pin<Box<dyn Future<Output = Result<AudioBuffer, TtsError>> + Send + '_>>;

    /// Display name for this engine (e.g. "espeak-ng").
    fn name(&self) -> String;
}

/// Create a TTS engine from config values.
///
/// `adapter` is one of: "http", "espeak".
pub fn create_tts_engine(config: &EngineConfig) -> anyhow::Result<Box<dyn TtsEngine>> {
    match config.adapter.as_str() {
        "http" => {
            let endpoint = config
                .endpoint
                .as_deref()
                .unwrap_or(http::DEFAULT_ENDPOINT);
            let model = config.model.as_deref().unwrap_or(http::DEFAULT_MODEL);
            Ok(Box::new(HttpTts::new(
                endpoint,
                model,
                config.api_key.as_deref(),
            )))
        }
        "espeak" => {
            let engine = match config.binary.as_deref() {
                Some(bin) => EspeakTts::with_binary(bin),
                None => EspeakTts::detect()?,
            };
            Ok(Box::new(engine))
        }
        other => anyhow::bail!("Unknown TTS adapter: {}", other),
    }
}
