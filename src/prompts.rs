//! System prompts for every LLM call the pipeline makes.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing behaviour (e.g. tightening the
//!    segment JSON shape or the spoken-text rules) requires editing exactly
//!    one place.
//!
//! 2. **Testability** — unit tests can import and inspect prompts directly
//!    without spinning up a real model, making prompt regressions easy to
//!    catch.
//!
//! Callers can override the page-analysis prompt via
//! [`crate::config::PipelineConfig::analysis_prompt`]; everything else is
//! built from the lecture agent at call time.

use crate::agent::LectureAgent;
use crate::content::{Segment, SegmentKind};

/// Default system prompt for segmenting a PDF page image.
///
/// Used when `PipelineConfig::analysis_prompt` is `None`.
pub const PAGE_ANALYSIS_PROMPT: &str = r#"You are an expert lecturer preparing to teach a document. Your task is to read a PDF page image and break it into teachable segments.

Follow these rules precisely:

1. SEGMENTS
   - Identify the distinct topics a lecturer would treat as separate teaching units
   - A typical page yields 1 to 4 segments; never invent a segment for boilerplate
   - Give each segment a short title a student would recognise in a table of contents

2. SUMMARY AND NARRATION NOTES
   - "summary": one faithful paragraph stating what the page actually says
   - "narration": the key points a narrator must cover, in teaching order
   - Base both strictly on the page; never add outside knowledge

3. KIND
   - Label each segment: concept, text, example, figure, table, formula,
     citation, or summary
   - Use figure/table/formula when the segment centres on that element, and write
     the narration notes as you would describe it to a listener who cannot see it
   - Use citation only when the segment discusses the cited literature itself

4. PREREQUISITES
   - List the titles of topics (from this page or an earlier one) the listener
     must already understand before this segment
   - Only genuine dependencies; most segments have none

5. WHAT TO IGNORE
   - Page numbers, repeated headers/footers, decorative borders
   - Bibliography entries, unless the page is about the literature itself

6. OUTPUT FORMAT
   - Output ONLY a JSON object — no commentary, no markdown fences
   - Shape: {"segments":[{"title":"…","summary":"…","narration":"…","kind":"concept","prerequisites":[]}]}
   - Use [] for prerequisites when there are none"#;

/// System prompt for captioning a single detected element (legacy path).
///
/// The reply is spoken verbatim inside the narration, so the rules forbid
/// any visual-medium phrasing.
pub fn element_caption_prompt(kind: SegmentKind) -> String {
    let noun = match kind {
        SegmentKind::Table => "table",
        SegmentKind::Formula => "formula",
        _ => "figure",
    };
    format!(
        r#"You are describing a {noun} from a document to a listener who cannot see it.

Follow these rules precisely:

1. Describe what the {noun} shows and the one thing it proves or illustrates
2. 2 to 4 plain sentences, readable aloud
3. Never say "as shown", "see below", "this image", or mention colours or layout
4. Output only the description, with no preamble"#
    )
}

/// Build the ordering request for the legacy path.
///
/// `catalogue` is a JSON array of `{"id","title","summary"}` objects, built
/// by the caller so this module stays serialisation-free.
pub fn ordering_prompt(catalogue: &str) -> String {
    format!(
        r#"You are planning the teaching order for the segments of a lecture.

Follow these rules precisely:

1. ORDER
   - Arrange the segments so every idea is introduced before it is used
   - Keep the document's own order when no dependency forces a change

2. PREREQUISITES
   - For each segment, list the ids of segments that must come earlier
   - Use only ids from the catalogue; omit segments with no prerequisites

3. OUTPUT FORMAT
   - Output ONLY a JSON object — no commentary, no markdown fences
   - Shape: {{"order":["seg-001","seg-002"],"prerequisites":{{"seg-002":["seg-001"]}}}}
   - "order" must contain every catalogue id exactly once

Segment catalogue:
{catalogue}"#
    )
}

/// System prompt for script generation, personalised to the agent.
pub fn script_system_prompt(agent: &LectureAgent) -> String {
    format!(
        r#"{persona}

You are recording an audio lecture. Follow these rules precisely:

1. AUDIENCE AND STYLE
   - Audience: {audience}
   - Delivery: {style}

2. SPOKEN TEXT ONLY
   - Plain sentences a voice can read aloud
   - No markdown, bullet points, headings, or asterisks
   - Expand abbreviations and read symbols and formulas out in words
   - Never refer to "this document", "this PDF", or "the page" — say "this lecture"

3. LENGTH
   - Aim for {target} for this part of the lecture

4. FLOW
   - The listener has heard everything before this part; build on it
   - No greetings or self-introductions outside the opening
   - End on a complete sentence, never a cliffhanger

5. LANGUAGE
   - Write in {language}

6. OUTPUT FORMAT
   - Output only the narration text, with no labels, quotes, or commentary"#,
        persona = agent.persona,
        audience = agent.audience,
        style = agent.style,
        target = agent.verbosity.target_sentences(),
        language = agent.language,
    )
}

/// Per-segment user prompt for script generation.
pub fn script_block_prompt(segment: &Segment, position: usize, total: usize) -> String {
    format!(
        r#"Narrate part {position} of {total}: "{title}".

What the document says:
{summary}

Points to cover, in order:
{notes}"#,
        position = position,
        total = total,
        title = segment.title,
        summary = segment.summary,
        notes = segment.narration_notes,
    )
}

/// Context message carrying the tail of the previous block's narration
/// (continuity mode only).
pub fn continuity_context(prior: &str) -> String {
    format!(
        "The narration immediately before this part was:\n\n\"\"\"{}\"\"\"\n\nContinue from it without repeating it.",
        prior
    )
}

/// User prompt for the lecture opening.
pub fn intro_prompt(title: &str, author: Option<&str>, agenda: &[String]) -> String {
    let by = match author {
        Some(a) if !a.is_empty() => format!(" by {a}"),
        _ => String::new(),
    };
    let agenda = agenda.join("; ");
    format!(
        r#"Open the lecture. The material is "{title}"{by}.

Welcome the listener in your own voice, say what the lecture covers, and hand over to the first topic. The topics, in order: {agenda}."#
    )
}

/// User prompt for the lecture closing.
pub fn outro_prompt(title: &str, agenda: &[String]) -> String {
    let agenda = agenda.join("; ");
    format!(
        r#"Close the lecture on "{title}".

Remind the listener of the ground covered ({agenda}), pull out the one thing worth remembering, and sign off in your own voice."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::builtin_agents;

    #[test]
    fn analysis_prompt_demands_bare_json() {
        assert!(PAGE_ANALYSIS_PROMPT.contains("ONLY a JSON object"));
        assert!(PAGE_ANALYSIS_PROMPT.contains("\"segments\""));
    }

    #[test]
    fn caption_prompt_names_the_element_kind() {
        assert!(element_caption_prompt(SegmentKind::Table).contains("table"));
        assert!(element_caption_prompt(SegmentKind::Formula).contains("formula"));
        assert!(element_caption_prompt(SegmentKind::Figure).contains("figure"));
    }

    #[test]
    fn script_prompt_carries_the_agent_through() {
        let agent = &builtin_agents()[0];
        let prompt = script_system_prompt(agent);
        assert!(prompt.contains(&agent.persona));
        assert!(prompt.contains(&agent.audience));
        assert!(prompt.contains(agent.verbosity.target_sentences()));
    }

    #[test]
    fn ordering_prompt_embeds_the_catalogue() {
        let prompt = ordering_prompt(r#"[{"id":"seg-001"}]"#);
        assert!(prompt.contains("seg-001"));
        assert!(prompt.contains("\"order\""));
    }

    #[test]
    fn intro_prompt_skips_empty_author() {
        let p = intro_prompt("Linear Algebra", None, &["Vectors".into()]);
        assert!(!p.contains(" by "));
        assert!(p.contains("Vectors"));
    }
}
