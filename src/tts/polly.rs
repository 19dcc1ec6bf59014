//! AWS Polly synthesizer.
//!
//! Each block costs two API calls when the engine supports speech marks:
//! one for MP3 audio, one for word marks (NDJSON). Engines without marks
//! (generative) get one call plus estimated timings. A failed marks call
//! never fails the block — the audio is already paid for, so timings fall
//! back to estimation instead.

use async_trait::async_trait;
use aws_sdk_polly::types::{Engine, LanguageCode, OutputFormat, SpeechMarkType, TextType, VoiceId};
use aws_sdk_polly::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::agent::{SpeechEngine, VoiceSpec};
use crate::content::AudioFormat;
use crate::error::LectureError;
use crate::timing::WordTiming;

use super::{
    display_word, estimate_timings, estimated_duration_ms, mp3_duration_ms, word_weight,
    SpeechSynthesizer, SynthesizedBlock,
};

pub struct PollySynthesizer {
    client: Client,
}

impl PollySynthesizer {
    /// Build a client from the default AWS credential/region chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn request(
        &self,
        text: &str,
        voice: &VoiceSpec,
        format: OutputFormat,
    ) -> aws_sdk_polly::operation::synthesize_speech::builders::SynthesizeSpeechFluentBuilder {
        let mut req = self
            .client
            .synthesize_speech()
            .engine(map_engine(voice.engine))
            .output_format(format)
            .text(text)
            .text_type(TextType::Text)
            .voice_id(VoiceId::from(voice.voice_id.as_str()));
        if let Some(ref code) = voice.language_code {
            req = req.language_code(LanguageCode::from(code.as_str()));
        }
        req
    }

    async fn fetch_audio(&self, text: &str, voice: &VoiceSpec) -> Result<Vec<u8>, LectureError> {
        let out = self
            .request(text, voice, OutputFormat::Mp3)
            .send()
            .await
            .map_err(|e| LectureError::SpeechApiError {
                detail: e.into_service_error().to_string(),
            })?;
        let bytes = out
            .audio_stream
            .collect()
            .await
            .map_err(|e| LectureError::SpeechApiError {
                detail: format!("audio stream read failed: {e}"),
            })?
            .to_vec();
        Ok(bytes)
    }

    async fn fetch_word_marks(
        &self,
        text: &str,
        voice: &VoiceSpec,
    ) -> Result<Vec<SpeechMark>, LectureError> {
        let out = self
            .request(text, voice, OutputFormat::Json)
            .speech_mark_types(SpeechMarkType::Word)
            .send()
            .await
            .map_err(|e| LectureError::SpeechApiError {
                detail: e.into_service_error().to_string(),
            })?;
        let bytes = out
            .audio_stream
            .collect()
            .await
            .map_err(|e| LectureError::SpeechApiError {
                detail: format!("marks stream read failed: {e}"),
            })?
            .to_vec();
        Ok(parse_speech_marks(&bytes))
    }
}

#[async_trait]
impl SpeechSynthesizer for PollySynthesizer {
    fn format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSpec,
    ) -> Result<SynthesizedBlock, LectureError> {
        let audio = self.fetch_audio(text, voice).await?;
        let duration_ms = mp3_duration_ms(&audio).unwrap_or_else(|| estimated_duration_ms(text));

        let marks = if voice.engine.supports_speech_marks() {
            match self.fetch_word_marks(text, voice).await {
                Ok(marks) => marks,
                Err(e) => {
                    warn!("speech marks unavailable, estimating timings: {e}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let (timings, estimated) = if marks.is_empty() {
            (estimate_timings(text, duration_ms), true)
        } else {
            (timings_from_marks(&marks, duration_ms), false)
        };

        debug!(
            "polly block: {} bytes, {} ms, {} words ({})",
            audio.len(),
            duration_ms,
            timings.len(),
            if estimated { "estimated" } else { "marked" }
        );

        Ok(SynthesizedBlock {
            audio,
            duration_ms,
            timings,
            estimated,
        })
    }
}

/// AWS credential material is visible in the environment. A cheap gate so
/// local runs without credentials fall through to the mock backend instead
/// of failing every block.
pub(crate) fn aws_credentials_present() -> bool {
    [
        "AWS_ACCESS_KEY_ID",
        "AWS_PROFILE",
        "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI",
        "AWS_WEB_IDENTITY_TOKEN_FILE",
    ]
    .iter()
    .any(|var| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false))
}

fn map_engine(engine: SpeechEngine) -> Engine {
    match engine {
        SpeechEngine::Standard => Engine::Standard,
        SpeechEngine::Neural => Engine::Neural,
        SpeechEngine::LongForm => Engine::LongForm,
        SpeechEngine::Generative => Engine::Generative,
    }
}

/// One line of Polly's `application/x-json-stream` speech-mark output.
#[derive(Debug, Deserialize)]
struct SpeechMark {
    /// Milliseconds from the start of the stream.
    time: u64,
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

/// Parse NDJSON speech marks, keeping only `word` entries. Unparseable
/// lines are skipped rather than failing the block.
fn parse_speech_marks(bytes: &[u8]) -> Vec<SpeechMark> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter_map(|line| serde_json::from_str::<SpeechMark>(line.trim()).ok())
        .filter(|mark| mark.kind == "word")
        .collect()
}

/// Marks carry start times only. Each word ends where the next begins; the
/// last word gets its estimated speech span, capped at the block duration.
fn timings_from_marks(marks: &[SpeechMark], duration_ms: u64) -> Vec<WordTiming> {
    marks
        .iter()
        .enumerate()
        .map(|(i, mark)| {
            let end_ms = match marks.get(i + 1) {
                Some(next) => next.time,
                None => (mark.time + word_weight(&mark.value).0).min(duration_ms.max(mark.time)),
            };
            WordTiming {
                word: display_word(&mark.value),
                start_ms: mark.time,
                end_ms,
                block_id: 0,
            }
        })
        .collect()
}
