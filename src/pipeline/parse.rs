//! Model-reply parsing: deterministic extraction of the JSON the prompts
//! asked for.
//!
//! Even well-prompted models occasionally wrap replies in ```json fences or
//! lead with a sentence of prose despite being told not to. The rules here
//! fix those quirks without touching content, so the prompts stay focused
//! on *what to produce* rather than formatting edge-cases.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::content::RawSegment;
use crate::error::LectureError;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*)\n```\s*$").unwrap());

/// Strip an outer ```json fence if the model added one.
pub fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.trim().to_string()
    }
}

/// The outermost JSON object, tolerating prose before and after it.
fn extract_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let end = input.rfind('}')?;
    if end > start {
        Some(&input[start..=end])
    } else {
        None
    }
}

fn parse_object<T>(raw: &str, what: &str) -> Result<T, LectureError>
where
    T: for<'de> Deserialize<'de>,
{
    let stripped = strip_code_fences(raw);
    let json =
        extract_json_object(&stripped).ok_or_else(|| LectureError::InvalidModelReply {
            detail: format!("{what}: no JSON object in reply"),
        })?;
    serde_json::from_str(json).map_err(|e| LectureError::InvalidModelReply {
        detail: format!("{what}: {e}"),
    })
}

#[derive(Deserialize)]
struct SegmentsPayload {
    #[serde(default)]
    segments: Vec<RawSegment>,
}

/// Parse a page-analysis reply: `{"segments": [...]}`.
///
/// An empty list is valid — blank or decorative pages genuinely have no
/// teachable content.
pub fn parse_page_segments(raw: &str) -> Result<Vec<RawSegment>, LectureError> {
    let payload: SegmentsPayload = parse_object(raw, "page analysis")?;
    Ok(payload.segments)
}

/// An ordering reply: the model's preferred narration order plus
/// prerequisite edges, both speaking in segment ids.
#[derive(Debug, Default, Deserialize)]
pub struct OrderingReply {
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub prerequisites: HashMap<String, Vec<String>>,
}

/// Parse the segment-ordering reply: `{"order": [...], "prerequisites": {...}}`.
pub fn parse_ordering(raw: &str) -> Result<OrderingReply, LectureError> {
    parse_object(raw, "segment ordering")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_reply_is_unwrapped() {
        let raw = "```json\n{\"segments\":[{\"title\":\"T\",\"summary\":\"S\"}]}\n```";
        let segments = parse_page_segments(raw).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].title, "T");
    }

    #[test]
    fn prose_around_the_object_is_tolerated() {
        let raw = "Here is the breakdown you asked for:\n{\"segments\":[]}\nHope that helps!";
        assert!(parse_page_segments(raw).unwrap().is_empty());
    }

    #[test]
    fn plain_object_passes_through() {
        let segments =
            parse_page_segments(r#"{"segments":[{"title":"A","summary":"B","kind":"figure"}]}"#)
                .unwrap();
        assert_eq!(segments[0].kind, crate::content::SegmentKind::Figure);
    }

    #[test]
    fn reply_without_json_is_an_invalid_model_reply() {
        let err = parse_page_segments("I cannot see any image.").unwrap_err();
        assert!(matches!(err, LectureError::InvalidModelReply { .. }));
    }

    #[test]
    fn broken_json_names_the_call_site() {
        let err = parse_page_segments("{\"segments\": [oops]}").unwrap_err();
        match err {
            LectureError::InvalidModelReply { detail } => {
                assert!(detail.starts_with("page analysis"), "got: {detail}")
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn ordering_fields_default_when_missing() {
        let reply = parse_ordering(r#"{"order":["seg-002","seg-001"]}"#).unwrap();
        assert_eq!(reply.order, vec!["seg-002", "seg-001"]);
        assert!(reply.prerequisites.is_empty());
    }

    #[test]
    fn ordering_edges_parse() {
        let reply = parse_ordering(
            r#"{"order":["seg-001"],"prerequisites":{"seg-002":["seg-001"]}}"#,
        )
        .unwrap();
        assert_eq!(reply.prerequisites["seg-002"], vec!["seg-001"]);
    }
}
