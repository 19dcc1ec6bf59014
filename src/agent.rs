//! Lecture agents: the narration personality attached to a job.
//!
//! An agent bundles everything that shapes how a lecture sounds, from the
//! persona wording injected into the script prompt down to the TTS voice.
//! Agents are plain serialisable records so deployments can manage them over
//! the HTTP API and persist them next to the jobs.

use serde::{Deserialize, Serialize};

use crate::error::LectureError;

/// A narration personality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LectureAgent {
    /// Stable identifier, used in upload requests and storage keys.
    pub id: String,
    /// Human-readable name shown in playback manifests.
    pub name: String,
    /// Second-person description of who the narrator is. Injected verbatim
    /// into the script system prompt, so write it like an instruction:
    /// "You are a patient university professor…".
    pub persona: String,
    /// Who the lecture is for ("undergraduates new to the topic").
    pub audience: String,
    /// Delivery notes layered on top of the persona ("measured pace, dry
    /// humour, no filler phrases").
    pub style: String,
    pub verbosity: Verbosity,
    /// Narration language as a BCP 47 primary tag ("en", "fr").
    #[serde(default = "default_language")]
    pub language: String,
    pub voice: VoiceSpec,
}

fn default_language() -> String {
    "en".to_string()
}

impl LectureAgent {
    /// Validate fields that end up in prompts and storage keys.
    pub fn validate(&self) -> Result<(), LectureError> {
        if self.id.is_empty() || self.id.contains('/') || self.id.contains(char::is_whitespace) {
            return Err(LectureError::InvalidConfig(format!(
                "agent id '{}' must be non-empty with no slashes or whitespace",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(LectureError::InvalidConfig("agent name is empty".into()));
        }
        if self.persona.trim().is_empty() {
            return Err(LectureError::InvalidConfig(format!(
                "agent '{}' has an empty persona",
                self.id
            )));
        }
        if self.voice.voice_id.trim().is_empty() {
            return Err(LectureError::InvalidConfig(format!(
                "agent '{}' has an empty voice id",
                self.id
            )));
        }
        Ok(())
    }
}

/// How much the narrator says per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// A couple of sentences per segment; headline tour of the document.
    Brief,
    #[default]
    Standard,
    /// Full walkthrough with examples and restatements.
    Deep,
}

impl Verbosity {
    /// Target spoken length per segment, used in the script prompt.
    pub fn target_sentences(&self) -> &'static str {
        match self {
            Verbosity::Brief => "2 to 3 sentences",
            Verbosity::Standard => "5 to 8 sentences",
            Verbosity::Deep => "10 to 15 sentences",
        }
    }
}

/// TTS voice selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSpec {
    /// Provider voice name, e.g. "Joanna" or "Matthew" for Polly.
    pub voice_id: String,
    #[serde(default)]
    pub engine: SpeechEngine,
    /// Full locale hint for the synthesizer ("en-US"). Optional; most voices
    /// imply their locale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl Default for VoiceSpec {
    fn default() -> Self {
        Self {
            voice_id: "Joanna".to_string(),
            engine: SpeechEngine::default(),
            language_code: None,
        }
    }
}

/// Synthesis engine tier.
///
/// Engines trade naturalness against cost and feature support. The one
/// functional difference the pipeline cares about: the generative engine
/// returns no per-word speech marks, so word timings fall back to estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeechEngine {
    Standard,
    #[default]
    Neural,
    LongForm,
    Generative,
}

impl SpeechEngine {
    /// Whether the engine can return per-word speech marks.
    pub fn supports_speech_marks(&self) -> bool {
        !matches!(self, SpeechEngine::Generative)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpeechEngine::Standard => "standard",
            SpeechEngine::Neural => "neural",
            SpeechEngine::LongForm => "long-form",
            SpeechEngine::Generative => "generative",
        }
    }
}

impl std::str::FromStr for SpeechEngine {
    type Err = LectureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(SpeechEngine::Standard),
            "neural" => Ok(SpeechEngine::Neural),
            "long-form" | "longform" => Ok(SpeechEngine::LongForm),
            "generative" => Ok(SpeechEngine::Generative),
            other => Err(LectureError::InvalidInput {
                input: format!("speech engine '{other}'"),
            }),
        }
    }
}

/// Agents shipped with the service. Deployments can overwrite or extend
/// them through the agent store.
pub fn builtin_agents() -> Vec<LectureAgent> {
    vec![
        LectureAgent {
            id: "professor".into(),
            name: "The Professor".into(),
            persona: "You are a patient university professor giving a recorded \
                      lecture. You introduce ideas before using them, connect each \
                      topic to the one before it, and flag the results worth \
                      remembering."
                .into(),
            audience: "university students meeting this material for the first time".into(),
            style: "measured pace, precise wording, the occasional dry aside".into(),
            verbosity: Verbosity::Standard,
            language: "en".into(),
            voice: VoiceSpec {
                voice_id: "Matthew".into(),
                engine: SpeechEngine::Neural,
                language_code: Some("en-US".into()),
            },
        },
        LectureAgent {
            id: "coach".into(),
            name: "The Coach".into(),
            persona: "You are an enthusiastic study coach recording a crash-course \
                      walkthrough. You keep energy high, translate jargon into plain \
                      words immediately, and tell the listener why each point \
                      matters to them."
                .into(),
            audience: "busy professionals skimming the document before a meeting".into(),
            style: "upbeat, direct address, short sentences".into(),
            verbosity: Verbosity::Brief,
            language: "en".into(),
            voice: VoiceSpec {
                voice_id: "Joanna".into(),
                engine: SpeechEngine::Neural,
                language_code: Some("en-US".into()),
            },
        },
        LectureAgent {
            id: "narrator".into(),
            name: "The Narrator".into(),
            persona: "You are a calm documentary narrator. You let the material \
                      speak for itself, describe figures vividly, and never \
                      editorialise."
                .into(),
            audience: "general listeners with no assumed background".into(),
            style: "even tone, vivid but economical descriptions".into(),
            verbosity: Verbosity::Deep,
            language: "en".into(),
            voice: VoiceSpec {
                voice_id: "Amy".into(),
                engine: SpeechEngine::Standard,
                language_code: Some("en-GB".into()),
            },
        },
    ]
}

/// Agent used when an upload names none.
pub const DEFAULT_AGENT_ID: &str = "professor";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_agents_are_valid_and_unique() {
        let agents = builtin_agents();
        assert!(agents.iter().any(|a| a.id == DEFAULT_AGENT_ID));
        for a in &agents {
            a.validate().unwrap();
        }
        let mut ids: Vec<_> = agents.iter().map(|a| a.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), agents.len());
    }

    #[test]
    fn validate_rejects_slash_in_id() {
        let mut agent = builtin_agents().remove(0);
        agent.id = "a/b".into();
        assert!(agent.validate().is_err());
    }

    #[test]
    fn generative_engine_has_no_speech_marks() {
        assert!(SpeechEngine::Neural.supports_speech_marks());
        assert!(!SpeechEngine::Generative.supports_speech_marks());
    }

    #[test]
    fn engine_round_trips_kebab_case() {
        let json = serde_json::to_string(&SpeechEngine::LongForm).unwrap();
        assert_eq!(json, "\"long-form\"");
        assert_eq!("long-form".parse::<SpeechEngine>().unwrap(), SpeechEngine::LongForm);
    }
}
