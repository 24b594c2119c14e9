//! Joins a batch's chunk audio into one artifact.

use std::time::Duration;

use super::AudioBuffer;
use crate::error::StitchError;

/// Silence inserted between consecutive chunks.
pub const DEFAULT_SILENCE_MS: u64 = 300;

/// Concatenate `buffers` in order with `silence` between neighbours.
///
/// No resampling: every buffer must share the first buffer's sample rate.
pub fn stitch(buffers: &[AudioBuffer], silence: Duration) -> Result<AudioBuffer, StitchError> {
    let first = buffers.first().ok_or(StitchError::EmptyBatch)?;
    let sample_rate = first.sample_rate();

    for (position, buffer) in buffers.iter().enumerate() {
        if buffer.is_empty() {
            return Err(StitchError::EmptyChunk { position });
        }
        if buffer.sample_rate() != sample_rate {
            return Err(StitchError::SampleRateMismatch {
                expected: sample_rate,
                found: buffer.sample_rate(),
                position,
            });
        }
    }

    let gap = silence_samples(silence, sample_rate);
    let total: usize =
        buffers.iter().map(AudioBuffer::len).sum::<usize>() + gap * (buffers.len() - 1);

    let mut samples = Vec::with_capacity(total);
    for (position, buffer) in buffers.iter().enumerate() {
        if position > 0 {
            samples.resize(samples.len() + gap, 0.0);
        }
        samples.extend_from_slice(buffer.samples());
    }

    Ok(AudioBuffer::new(samples, sample_rate))
}

/// Number of samples covering `silence` at `sample_rate`.
pub fn silence_samples(silence: Duration, sample_rate: u32) -> usize {
    (silence.as_secs_f64() * sample_rate as f64).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(values: &[f32]) -> AudioBuffer {
        AudioBuffer::new(values.to_vec(), 1_000)
    }

    #[test]
    fn test_silence_between_not_around() {
        let out = stitch(&[buf(&[1.0, 1.0]), buf(&[2.0]), buf(&[3.0])], Duration::from_millis(3)).unwrap();
        assert_eq!(
            out.samples(),
            &[1.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0]
        );
        assert_eq!(out.sample_rate(), 1_000);
    }

    #[test]
    fn test_single_chunk_unchanged() {
        let out = stitch(&[buf(&[0.5, -0.5])], Duration::from_millis(300)).unwrap();
        assert_eq!(out.samples(), &[0.5, -0.5]);
    }

    #[test]
    fn test_default_silence_at_kokoro_rate() {
        assert_eq!(
            silence_samples(Duration::from_millis(DEFAULT_SILENCE_MS), 24_000),
            7_200
        );
    }

    #[test]
    fn test_rejects_bad_batches() {
        assert_eq!(
            stitch(&[], Duration::ZERO).unwrap_err(),
            StitchError::EmptyBatch
        );
        assert_eq!(
            stitch(&[buf(&[1.0]), buf(&[])], Duration::ZERO).unwrap_err(),
            StitchError::EmptyChunk { position: 1 }
        );
        assert_eq!(
            stitch(
                &[buf(&[1.0]), AudioBuffer::new(vec![1.0], 24_000)],
                Duration::ZERO
            )
            .unwrap_err(),
            StitchError::SampleRateMismatch {
                expected: 1_000,
                found: 24_000,
                position: 1
            }
        );
    }

    #[test]
    fn test_inputs_untouched() {
        let inputs = vec![buf(&[1.0]), buf(&[2.0])];
        let before = inputs.clone();
        let _ = stitch(&inputs, Duration::from_millis(1)).unwrap();
        assert_eq!(inputs, before);
    }
}
