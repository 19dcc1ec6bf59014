//! Offline synthesizer for development and tests.
//!
//! Emits a mono WAV track where each word is an audible tone whose span
//! matches its timing entry exactly, so playback-sync code can be exercised
//! end to end without AWS credentials or network access.

use async_trait::async_trait;
use std::io::Cursor;

use crate::agent::VoiceSpec;
use crate::content::AudioFormat;
use crate::error::LectureError;
use crate::timing::WordTiming;

use super::{estimate_timings, estimated_duration_ms, SpeechSynthesizer, SynthesizedBlock};

pub struct MockSynthesizer {
    sample_rate: u32,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            sample_rate: 16_000,
        }
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    fn format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceSpec,
    ) -> Result<SynthesizedBlock, LectureError> {
        let duration_ms = estimated_duration_ms(text);
        let timings = estimate_timings(text, duration_ms);
        let audio = render_track(&timings, duration_ms, self.sample_rate)?;

        Ok(SynthesizedBlock {
            audio,
            duration_ms,
            timings,
            estimated: true,
        })
    }
}

/// Tone pitch for a word. Varies with length so consecutive words are
/// audibly distinct.
fn tone_hz(word: &str) -> f32 {
    180.0 + 22.0 * (word.chars().count() % 10) as f32
}

fn render_track(
    timings: &[WordTiming],
    duration_ms: u64,
    sample_rate: u32,
) -> Result<Vec<u8>, LectureError> {
    let total = (duration_ms * sample_rate as u64 / 1000) as usize;
    let mut samples = vec![0i16; total];

    for t in timings {
        let start = (t.start_ms * sample_rate as u64 / 1000) as usize;
        let end = ((t.end_ms * sample_rate as u64 / 1000) as usize).min(total);
        let start = start.min(end);
        let step = tone_hz(&t.word) * 2.0 * std::f32::consts::PI / sample_rate as f32;
        for (i, sample) in samples[start..end].iter_mut().enumerate() {
            *sample = ((i as f32 * step).sin() * 0.25 * i16::MAX as f32) as i16;
        }
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut out, spec)
            .map_err(|e| LectureError::SpeechApiError {
                detail: format!("WAV encode failed: {e}"),
            })?;
        for s in samples {
            writer
                .write_sample(s)
                .map_err(|e| LectureError::SpeechApiError {
                    detail: format!("WAV encode failed: {e}"),
                })?;
        }
        writer
            .finalize()
            .map_err(|e| LectureError::SpeechApiError {
                detail: format!("WAV encode failed: {e}"),
            })?;
    }
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::is_monotonic;

    #[tokio::test]
    async fn block_audio_matches_its_timings() {
        let tts = MockSynthesizer::new();
        let block = tts
            .synthesize("Welcome to the lecture.", &VoiceSpec::default())
            .await
            .unwrap();

        assert_eq!(tts.format(), AudioFormat::Wav);
        assert!(block.estimated);
        assert_eq!(block.timings.len(), 4);
        assert!(is_monotonic(&block.timings));
        assert!(block.timings.last().unwrap().end_ms <= block.duration_ms);

        let reader = hound::WavReader::new(Cursor::new(block.audio.as_slice())).unwrap();
        let expected_samples = block.duration_ms * 16_000 / 1000;
        assert_eq!(reader.len() as u64, expected_samples);
    }

    #[tokio::test]
    async fn empty_text_yields_a_silent_empty_block() {
        let tts = MockSynthesizer::new();
        let block = tts.synthesize("", &VoiceSpec::default()).await.unwrap();
        assert_eq!(block.duration_ms, 0);
        assert!(block.timings.is_empty());
    }
}
