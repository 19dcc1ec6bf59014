//! Content model: what the analysis stages produce and the script/audio
//! stages consume.
//!
//! Everything here is a plain serialisable value type. Pipeline stages pass
//! these by value; stores persist them as JSON next to the binary artefacts.

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Document metadata read from the PDF, without any LLM involvement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// What kind of content a segment covers.
///
/// `Other` absorbs anything unexpected the model invents so one odd label
/// never fails a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    #[default]
    Concept,
    Text,
    Example,
    Figure,
    Table,
    Formula,
    Citation,
    Summary,
    #[serde(other)]
    Other,
}

/// One teachable topic, merged across pages and ordered for narration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Stable id assigned at merge time ("seg-001"). Prerequisites and
    /// script blocks refer to segments by this id.
    pub id: String,
    pub title: String,
    /// One-paragraph summary. Doubles as the fallback narration when script
    /// generation fails for this segment.
    pub summary: String,
    /// Key points the narrator must cover, as extracted from the page.
    pub narration_notes: String,
    pub kind: SegmentKind,
    /// 1-indexed source pages, ascending. More than one after a cross-page
    /// merge.
    pub pages: Vec<usize>,
    /// Ids of segments that must be narrated before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<String>,
}

/// Per-page analysis result. Never fails the whole document: a page that
/// exhausted its retries carries `error` and an empty segment list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysis {
    /// 1-indexed page number.
    pub page: usize,
    /// Raw segments as the model described them, before cross-page merging.
    pub segments: Vec<RawSegment>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub duration_ms: u64,
    pub retries: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
}

/// A segment as emitted by the model for one page. Prerequisites are still
/// free-text titles here; [`crate::pipeline::analyze::merge_pages`] resolves
/// them to ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSegment {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub narration: String,
    #[serde(default)]
    pub kind: SegmentKind,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

/// Role of a script block in the lecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Intro,
    Segment,
    Outro,
}

/// One narrated unit of the lecture, in track order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptBlock {
    /// Position in the track, 0-based. Word timings refer back to this.
    pub id: usize,
    pub kind: BlockKind,
    /// The segment this block narrates; None for intro/outro.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
    /// Display heading for playback UIs.
    pub heading: String,
    /// Exactly what gets sent to the synthesizer.
    pub text: String,
    /// True when the block fell back to the segment summary.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

/// The whole narration script for a lecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LectureScript {
    pub agent_id: String,
    /// Lecture title (document title or filename).
    pub title: String,
    pub blocks: Vec<ScriptBlock>,
}

impl LectureScript {
    /// Words across all blocks, counted the same way the timing estimator
    /// splits them.
    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.text.split_whitespace().count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.text.trim().is_empty())
    }
}

/// Container format of the assembled lecture audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_segment_kind_parses_as_other() {
        let raw: RawSegment = serde_json::from_str(
            r#"{"title":"T","summary":"S","narration":"N","kind":"haiku"}"#,
        )
        .unwrap();
        assert_eq!(raw.kind, SegmentKind::Other);
    }

    #[test]
    fn citation_and_text_kinds_parse_as_themselves() {
        let citation: RawSegment = serde_json::from_str(
            r#"{"title":"Related Work","summary":"S","kind":"citation"}"#,
        )
        .unwrap();
        assert_eq!(citation.kind, SegmentKind::Citation);

        let text: RawSegment =
            serde_json::from_str(r#"{"title":"T","summary":"S","kind":"text"}"#).unwrap();
        assert_eq!(text.kind, SegmentKind::Text);
    }

    #[test]
    fn raw_segment_tolerates_missing_optional_fields() {
        let raw: RawSegment =
            serde_json::from_str(r#"{"title":"T","summary":"S"}"#).unwrap();
        assert!(raw.narration.is_empty());
        assert_eq!(raw.kind, SegmentKind::Concept);
        assert!(raw.prerequisites.is_empty());
    }

    #[test]
    fn word_count_matches_whitespace_split() {
        let script = LectureScript {
            agent_id: "professor".into(),
            title: "T".into(),
            blocks: vec![
                ScriptBlock {
                    id: 0,
                    kind: BlockKind::Intro,
                    segment_id: None,
                    heading: "Welcome".into(),
                    text: "Hello there, welcome along.".into(),
                    degraded: false,
                },
                ScriptBlock {
                    id: 1,
                    kind: BlockKind::Outro,
                    segment_id: None,
                    heading: "Wrap-up".into(),
                    text: "That is all.".into(),
                    degraded: false,
                },
            ],
        };
        assert_eq!(script.word_count(), 7);
        assert!(!script.is_empty());
    }

    #[test]
    fn audio_format_content_types() {
        assert_eq!(AudioFormat::Wav.content_type(), "audio/wav");
        assert_eq!(AudioFormat::Mp3.extension(), "mp3");
    }
}
