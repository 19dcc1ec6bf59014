//! Speech synthesis seam and word-timing estimation.
//!
//! The audio stage talks to [`SpeechSynthesizer`], one block of script text
//! at a time. Two backends ship with the crate: [`mock::MockSynthesizer`]
//! (offline, WAV tones, exact timings) for development and tests, and
//! [`polly::PollySynthesizer`] (feature `polly`) for real narration.
//!
//! ## Where timings come from
//!
//! Engines that return per-word speech marks give real start times; the end
//! of each word is taken as the next word's start. Engines without marks
//! (and the mock backend) fall back to [`estimate_timings`], which budgets
//! each word by length and scales the result to the block's real duration.

pub mod mock;
mod mp3;
#[cfg(feature = "polly")]
pub mod polly;

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::VoiceSpec;
use crate::config::PipelineConfig;
use crate::content::AudioFormat;
use crate::error::LectureError;
use crate::timing::WordTiming;

pub(crate) use mp3::mp3_duration_ms;

/// One script block, spoken.
///
/// `timings` are block-relative (first word starts near 0 ms) with
/// `block_id` left at 0; the audio stage rebases them onto the track clock
/// and fills the real block id.
#[derive(Debug, Clone)]
pub struct SynthesizedBlock {
    pub audio: Vec<u8>,
    pub duration_ms: u64,
    pub timings: Vec<WordTiming>,
    /// True when the timings were estimated rather than reported by the
    /// engine.
    pub estimated: bool,
}

/// Turns one block of text into audio plus word timings.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Container format of every block this synthesizer emits. All blocks of
    /// one lecture must share it so the track can be assembled by
    /// concatenation.
    fn format(&self) -> AudioFormat;

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSpec,
    ) -> Result<SynthesizedBlock, LectureError>;
}

/// Pick the synthesizer for a run.
///
/// Order: an explicitly configured synthesizer wins; then the
/// `PDF2LECTURE_TTS` env var (`mock` or `polly`) forces a backend; then
/// Polly is used when the feature is compiled in and AWS credentials look
/// present; otherwise the offline mock.
pub async fn resolve_synthesizer(config: &PipelineConfig) -> Arc<dyn SpeechSynthesizer> {
    if let Some(ref tts) = config.synthesizer {
        return Arc::clone(tts);
    }

    match std::env::var("PDF2LECTURE_TTS").as_deref() {
        Ok("mock") => return Arc::new(mock::MockSynthesizer::new()),
        #[cfg(feature = "polly")]
        Ok("polly") => return Arc::new(polly::PollySynthesizer::from_env().await),
        _ => {}
    }

    #[cfg(feature = "polly")]
    if polly::aws_credentials_present() {
        return Arc::new(polly::PollySynthesizer::from_env().await);
    }

    Arc::new(mock::MockSynthesizer::new())
}

// ── Timing estimation ─────────────────────────────────────────────────────

const WORD_BASE_MS: u64 = 260;
const PER_CHAR_MS: u64 = 55;
const SENTENCE_PAUSE_MS: u64 = 400;
const CLAUSE_PAUSE_MS: u64 = 200;

/// Speech time plus trailing pause for one whitespace token.
fn word_weight(token: &str) -> (u64, u64) {
    let letters = token.chars().filter(|c| c.is_alphanumeric()).count() as u64;
    let speech = WORD_BASE_MS + PER_CHAR_MS * letters;
    let pause = match token.chars().last() {
        Some('.') | Some('!') | Some('?') => SENTENCE_PAUSE_MS,
        Some(',') | Some(';') | Some(':') => CLAUSE_PAUSE_MS,
        _ => 0,
    };
    (speech, pause)
}

/// The word as playback UIs should highlight it: surrounding punctuation
/// stripped, unless that leaves nothing.
fn display_word(token: &str) -> String {
    let trimmed = token.trim_matches(|c: char| !c.is_alphanumeric());
    if trimmed.is_empty() {
        token.to_string()
    } else {
        trimmed.to_string()
    }
}

/// How long the estimator thinks `text` takes to speak, in milliseconds.
pub fn estimated_duration_ms(text: &str) -> u64 {
    text.split_whitespace()
        .map(|tok| {
            let (speech, pause) = word_weight(tok);
            speech + pause
        })
        .sum()
}

/// Estimate block-relative word timings for `text`, scaled so the last
/// pause ends at `duration_ms`.
///
/// Emits exactly one timing per whitespace token, which keeps the table in
/// lockstep with [`crate::content::LectureScript::word_count`]. Pass the
/// real audio duration when known; pass [`estimated_duration_ms`] of the
/// same text to keep the raw estimate (scale factor 1).
pub fn estimate_timings(text: &str, duration_ms: u64) -> Vec<WordTiming> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut spans = Vec::with_capacity(tokens.len());
    let mut cursor = 0u64;
    for tok in &tokens {
        let (speech, pause) = word_weight(tok);
        spans.push((cursor, cursor + speech));
        cursor += speech + pause;
    }

    let raw_total = cursor.max(1);
    let target = if duration_ms == 0 { raw_total } else { duration_ms };
    let rebase = |v: u64| ((v as u128 * target as u128) / raw_total as u128) as u64;

    tokens
        .iter()
        .zip(spans)
        .map(|(tok, (start, end))| WordTiming {
            word: display_word(tok),
            start_ms: rebase(start),
            end_ms: rebase(end),
            block_id: 0,
        })
        .collect()
}

// ── Track assembly ────────────────────────────────────────────────────────

/// Concatenate per-block audio into one track.
///
/// MP3 frames are self-describing, so same-voice blocks concatenate at the
/// byte level. WAV blocks are re-written into a single container; all
/// blocks must share one sample spec.
pub fn concat_frames(format: AudioFormat, frames: &[Vec<u8>]) -> Result<Vec<u8>, LectureError> {
    if frames.is_empty() {
        return Err(LectureError::Internal(
            "no audio frames to assemble".into(),
        ));
    }
    match format {
        AudioFormat::Mp3 => Ok(frames.concat()),
        AudioFormat::Wav => concat_wav(frames),
    }
}

fn concat_wav(frames: &[Vec<u8>]) -> Result<Vec<u8>, LectureError> {
    let mut spec: Option<hound::WavSpec> = None;
    let mut samples: Vec<i16> = Vec::new();

    for (i, frame) in frames.iter().enumerate() {
        let mut reader = hound::WavReader::new(Cursor::new(frame.as_slice()))
            .map_err(|e| wav_error(i, e))?;
        let frame_spec = reader.spec();
        match spec {
            None => spec = Some(frame_spec),
            Some(first) if first != frame_spec => {
                return Err(LectureError::AudioFailed {
                    block: i,
                    detail: format!(
                        "WAV spec mismatch: {} Hz vs {} Hz",
                        first.sample_rate, frame_spec.sample_rate
                    ),
                });
            }
            Some(_) => {}
        }
        for sample in reader.samples::<i16>() {
            samples.push(sample.map_err(|e| wav_error(i, e))?);
        }
    }

    // Checked above: frames is non-empty, so spec is set.
    let spec = spec.ok_or_else(|| LectureError::Internal("no WAV spec".into()))?;

    let mut out = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut out, spec).map_err(|e| wav_error(0, e))?;
        for s in samples {
            writer.write_sample(s).map_err(|e| wav_error(0, e))?;
        }
        writer.finalize().map_err(|e| wav_error(0, e))?;
    }
    Ok(out.into_inner())
}

fn wav_error(block: usize, e: hound::Error) -> LectureError {
    LectureError::AudioFailed {
        block,
        detail: format!("WAV processing failed: {e}"),
    }
}
