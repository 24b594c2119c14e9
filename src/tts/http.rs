//! OpenAI-compatible speech endpoint.
//!
//! POST `<endpoint>` with
//! `{"model": "kokoro", "input": "text", "voice": "am_echo", "speed": 1.1, "response_format": "pcm"}`
//! and receive raw 24 kHz 16-bit little-endian mono PCM. Works against the
//! OpenAI API as well as self-hosted Kokoro servers that mirror it.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use super::{TtsEngine, KOKORO_SAMPLE_RATE};
use crate::error::TtsError;
use crate::pipeline::{AudioBuffer, VoiceParams};

/// Local Kokoro server default.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8880/v1/audio/speech";

pub const DEFAULT_MODEL: &str = "kokoro";

pub struct HttpTts {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpTts {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: api_key.map(|k| k.to_string()),
            client: reqwest::Client::new(),
        }
    }
}

impl TtsEngine for HttpTts {
    fn synthesize(
        &self,
        text: &str,
        params: &VoiceParams,
    ) -> Pin<Box<dyn Future<Output = Result<AudioBuffer, TtsError>> + Send + '_>> {
        let text = text.to_string();
        let params = params.clone();
        Box::pin(async move {
            if text.trim().is_empty() {
                return Err(TtsError::Synthesis("empty input text".into()));
            }

            debug!(voice = %params.voice, text_len = text.len(), "Speech endpoint request");

            let body = serde_json::json!({
                "model": self.model,
                "input": text,
                "voice": params.voice,
                "speed": params.speed,
                "response_format": "pcm",
            });

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| TtsError::Network(format!("request failed: {}", e)))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(TtsError::Synthesis(format!("API error {}: {}", status, body)));
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| TtsError::Network(format!("failed to read response: {}", e)))?;

            let samples = pcm16_to_f32(&bytes);
            if samples.is_empty() {
                return Err(TtsError::Synthesis("endpoint returned no audio".into()));
            }

            Ok(AudioBuffer::new(samples, KOKORO_SAMPLE_RATE))
        })
    }

    fn name(&self) -> String {
        format!("Speech API ({} @ {})", self.model, self.endpoint)
    }
}

/// Convert little-endian i16 PCM bytes to f32 samples in [-1, 1).
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}
