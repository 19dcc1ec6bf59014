//! Audio assembly: script blocks in, one continuous track plus a word-timing
//! table out.
//!
//! Blocks synthesize concurrently (the TTS API is network-bound like the
//! LLM calls) but assemble strictly in track order: each block's
//! block-relative timings shift right by the running duration of everything
//! before it, so the table reads as one monotonic clock over the whole
//! lecture.
//!
//! Synthesis failures are fatal, unlike analysis and script failures. A
//! block skipped here would leave a hole in the track and silently shift
//! every later word timing off its audio.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::agent::VoiceSpec;
use crate::config::PipelineConfig;
use crate::content::{AudioFormat, LectureScript};
use crate::error::LectureError;
use crate::job::StageKind;
use crate::retry::{llm_retryable, with_backoff};
use crate::timing::{shift, WordTiming};
use crate::tts::{concat_frames, SpeechSynthesizer, SynthesizedBlock};

/// Everything the audio stage produces.
#[derive(Debug, Clone)]
pub struct AudioOutcome {
    /// The assembled track, ready to serve with `format.content_type()`.
    pub audio: Vec<u8>,
    pub format: AudioFormat,
    pub duration_ms: u64,
    /// Track-relative word timings, ascending by `start_ms`, with
    /// `block_id` filled in.
    pub timings: Vec<WordTiming>,
    /// True when any block's timings were estimated rather than reported by
    /// the engine.
    pub estimated: bool,
}

/// Synthesize every script block and assemble the lecture track.
pub async fn synthesize_script(
    tts: &Arc<dyn SpeechSynthesizer>,
    config: &PipelineConfig,
    voice: &VoiceSpec,
    script: &LectureScript,
) -> Result<AudioOutcome, LectureError> {
    let spoken: Vec<(usize, String)> = script
        .blocks
        .iter()
        .filter(|b| !b.text.trim().is_empty())
        .map(|b| (b.id, b.text.clone()))
        .collect();
    if spoken.is_empty() {
        return Err(LectureError::Internal(
            "script has no narratable text".into(),
        ));
    }

    let total = spoken.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(StageKind::Audio, total);
    }

    let mut synthesized: Vec<(usize, SynthesizedBlock)> =
        stream::iter(spoken.into_iter().map(|(block_id, text)| {
            let tts = Arc::clone(tts);
            let config = config.clone();
            let voice = voice.clone();
            async move {
                let result = synthesize_block(&tts, &config, &voice, block_id, &text).await;
                if let Some(ref cb) = config.progress_callback {
                    match &result {
                        Ok(_) => cb.on_unit_complete(StageKind::Audio, block_id, total),
                        Err(e) => cb.on_unit_error(StageKind::Audio, block_id, &e.to_string()),
                    }
                }
                result.map(|block| (block_id, block))
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;
    synthesized.sort_by_key(|(id, _)| *id);

    let format = tts.format();
    let mut frames = Vec::with_capacity(synthesized.len());
    let mut timings = Vec::new();
    let mut offset_ms = 0u64;
    let mut estimated = false;

    for (block_id, block) in synthesized {
        let mut block_timings = block.timings;
        shift(&mut block_timings, offset_ms);
        for t in &mut block_timings {
            t.block_id = block_id;
        }
        timings.extend(block_timings);
        frames.push(block.audio);
        offset_ms += block.duration_ms;
        estimated |= block.estimated;
    }

    let audio = concat_frames(format, &frames)?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_complete(StageKind::Audio, total, total);
    }
    info!(
        "Lecture '{}': {:.1}s of audio, {} word timings ({})",
        script.title,
        offset_ms as f64 / 1000.0,
        timings.len(),
        if estimated { "estimated" } else { "engine marks" },
    );

    Ok(AudioOutcome {
        audio,
        format,
        duration_ms: offset_ms,
        timings,
        estimated,
    })
}

/// Synthesize one block with the shared retry policy. Exhausted retries are
/// fatal here.
async fn synthesize_block(
    tts: &Arc<dyn SpeechSynthesizer>,
    config: &PipelineConfig,
    voice: &VoiceSpec,
    block_id: usize,
    text: &str,
) -> Result<SynthesizedBlock, LectureError> {
    let label = format!("audio block {block_id}");
    let outcome = with_backoff(&config.retry, &label, llm_retryable, || {
        let tts = Arc::clone(tts);
        let voice = voice.clone();
        let text = text.to_string();
        async move { tts.synthesize(&text, &voice).await }
    })
    .await
    .map_err(|e| LectureError::AudioFailed {
        block: block_id,
        detail: e.to_string(),
    })?;

    debug!(
        "{label}: {} bytes, {} ms, {} timings",
        outcome.value.audio.len(),
        outcome.value.duration_ms,
        outcome.value.timings.len()
    );
    Ok(outcome.value)
}
