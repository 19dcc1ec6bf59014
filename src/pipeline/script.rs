//! Script generation: ordered segments in, a narrated lecture script out.
//!
//! One model call per block — an opening, one block per segment, a closing —
//! all speaking with the configured agent's persona. A block whose calls
//! exhaust their retries falls back to narrating the segment summary
//! verbatim, marked `degraded`, so a flaky model costs polish rather than
//! the lecture.
//!
//! Blocks generate concurrently by default. Continuity mode trades that
//! concurrency for flow: blocks run in track order and each prompt carries
//! the tail of the previous narration.

use std::sync::Arc;

use edgequake_llm::ChatMessage;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::agent::LectureAgent;
use crate::config::PipelineConfig;
use crate::content::{BlockKind, LectureScript, ScriptBlock, Segment};
use crate::error::{LectureError, StageError};
use crate::job::StageKind;
use crate::model::{script_options, ChatModel};
use crate::prompts::{
    continuity_context, intro_prompt, outro_prompt, script_block_prompt, script_system_prompt,
};
use crate::retry::{llm_retryable, with_backoff};

/// Everything the script stage produces.
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub script: LectureScript,
    /// One warning per degraded block.
    pub warnings: Vec<StageError>,
}

/// Generate the full narration script for a lecture.
///
/// `segments` must already be in teaching order; block ids follow track
/// order (0 = intro). The returned script always has `segments.len() + 2`
/// blocks.
pub async fn generate_script(
    model: &Arc<dyn ChatModel>,
    config: &PipelineConfig,
    agent: &LectureAgent,
    title: &str,
    author: Option<&str>,
    segments: &[Segment],
) -> Result<ScriptOutcome, LectureError> {
    let agenda: Vec<String> = segments.iter().map(|s| s.title.clone()).collect();
    let system = script_system_prompt(agent);
    let total = segments.len() + 2;

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(StageKind::Script, total);
    }

    let plans = block_plans(title, author, &agenda, segments);

    let blocks = if config.continuity {
        narrate_sequential(model, config, &system, plans, total).await
    } else {
        narrate_concurrent(model, config, &system, plans, total).await
    };

    let warnings: Vec<StageError> = blocks
        .iter()
        .filter(|b| b.degraded)
        .map(|b| StageError::ScriptFailed {
            segment: b
                .segment_id
                .clone()
                .unwrap_or_else(|| b.heading.to_lowercase()),
            retries: config.retry.max_retries as u8,
            detail: "narration call failed, summary used verbatim".into(),
        })
        .collect();

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_complete(StageKind::Script, total - warnings.len(), total);
    }

    info!(
        "Lecture '{}': {} script blocks, {} degraded",
        title,
        blocks.len(),
        warnings.len()
    );

    Ok(ScriptOutcome {
        script: LectureScript {
            agent_id: agent.id.clone(),
            title: title.to_string(),
            blocks,
        },
        warnings,
    })
}

/// One planned block: everything needed to prompt for it or fall back.
struct BlockPlan {
    id: usize,
    kind: BlockKind,
    segment_id: Option<String>,
    heading: String,
    prompt: String,
    fallback: String,
}

fn block_plans(
    title: &str,
    author: Option<&str>,
    agenda: &[String],
    segments: &[Segment],
) -> Vec<BlockPlan> {
    let mut plans = Vec::with_capacity(segments.len() + 2);

    plans.push(BlockPlan {
        id: 0,
        kind: BlockKind::Intro,
        segment_id: None,
        heading: "Introduction".into(),
        prompt: intro_prompt(title, author, agenda),
        fallback: if agenda.is_empty() {
            format!("Welcome to this lecture on {title}.")
        } else {
            format!(
                "Welcome to this lecture on {title}. We will cover {}.",
                agenda.join(", then ")
            )
        },
    });

    let total = segments.len();
    for (i, segment) in segments.iter().enumerate() {
        plans.push(BlockPlan {
            id: i + 1,
            kind: BlockKind::Segment,
            segment_id: Some(segment.id.clone()),
            heading: segment.title.clone(),
            prompt: script_block_prompt(segment, i + 1, total),
            fallback: segment.summary.clone(),
        });
    }

    plans.push(BlockPlan {
        id: segments.len() + 1,
        kind: BlockKind::Outro,
        segment_id: None,
        heading: "Conclusion".into(),
        prompt: outro_prompt(title, agenda),
        fallback: format!("That concludes this lecture on {title}. Thank you for listening."),
    });

    plans
}

async fn narrate_concurrent(
    model: &Arc<dyn ChatModel>,
    config: &PipelineConfig,
    system: &str,
    plans: Vec<BlockPlan>,
    total: usize,
) -> Vec<ScriptBlock> {
    let mut blocks: Vec<ScriptBlock> = stream::iter(plans.into_iter().map(|plan| {
        let model = Arc::clone(model);
        let config = config.clone();
        let system = system.to_string();
        async move {
            let messages = vec![
                ChatMessage::system(&system),
                ChatMessage::user(&plan.prompt),
            ];
            let block = narrate_block(&model, &config, messages, plan).await;
            report_unit(&config, &block, total);
            block
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    blocks.sort_by_key(|b| b.id);
    blocks
}

async fn narrate_sequential(
    model: &Arc<dyn ChatModel>,
    config: &PipelineConfig,
    system: &str,
    plans: Vec<BlockPlan>,
    total: usize,
) -> Vec<ScriptBlock> {
    let mut blocks = Vec::with_capacity(plans.len());
    let mut prior: Option<String> = None;

    for plan in plans {
        let mut messages = vec![ChatMessage::system(system)];
        if let Some(ref tail) = prior {
            messages.push(ChatMessage::user(continuity_context(tail)));
        }
        messages.push(ChatMessage::user(&plan.prompt));

        let block = narrate_block(model, config, messages, plan).await;
        report_unit(config, &block, total);
        if !block.degraded {
            prior = Some(narration_tail(&block.text));
        }
        blocks.push(block);
    }

    blocks
}

/// Narrate one block, falling back to the planned text on failure.
async fn narrate_block(
    model: &Arc<dyn ChatModel>,
    config: &PipelineConfig,
    messages: Vec<ChatMessage>,
    plan: BlockPlan,
) -> ScriptBlock {
    let options = script_options(config);
    let label = format!("script block {} ({})", plan.id, plan.heading);

    let outcome = with_backoff(&config.retry, &label, llm_retryable, || {
        let model = Arc::clone(model);
        let messages = messages.clone();
        let options = options.clone();
        async move {
            let reply = model.chat(&messages, &options).await?;
            let text = clean_narration(&reply.content);
            if text.is_empty() {
                return Err(LectureError::InvalidModelReply {
                    detail: "empty narration".into(),
                });
            }
            Ok(text)
        }
    })
    .await;

    match outcome {
        Ok(attempted) => {
            debug!(
                "{label}: {} words",
                attempted.value.split_whitespace().count()
            );
            ScriptBlock {
                id: plan.id,
                kind: plan.kind,
                segment_id: plan.segment_id,
                heading: plan.heading,
                text: attempted.value,
                degraded: false,
            }
        }
        Err(e) => {
            warn!("{label}: narration failed, using summary verbatim: {e}");
            ScriptBlock {
                id: plan.id,
                kind: plan.kind,
                segment_id: plan.segment_id,
                heading: plan.heading,
                text: plan.fallback,
                degraded: true,
            }
        }
    }
}

fn report_unit(config: &PipelineConfig, block: &ScriptBlock, total: usize) {
    if let Some(ref cb) = config.progress_callback {
        if block.degraded {
            cb.on_unit_error(StageKind::Script, block.id, "fell back to summary");
        } else {
            cb.on_unit_complete(StageKind::Script, block.id, total);
        }
    }
}

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s*").unwrap());
static RE_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-*•]\s+").unwrap());
static RE_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|__|```[a-z]*|`").unwrap());
static RE_STAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]\n]{1,80}\]|\*[^*\n]{1,80}\*").unwrap());
static RE_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip the formatting artefacts models leak despite the prompt: markdown
/// emphasis and headings, bullet markers, and bracketed or starred stage
/// directions like `[pause]` or `*clears throat*`. The synthesizer would
/// otherwise read them aloud.
pub fn clean_narration(raw: &str) -> String {
    let text = RE_HEADING.replace_all(raw.trim(), "");
    let text = RE_BULLET.replace_all(&text, "");
    let text = RE_STAGE.replace_all(&text, " ");
    let text = RE_EMPHASIS.replace_all(&text, "");
    let text = RE_BLANKS.replace_all(&text, "\n\n");

    text.lines()
        .map(|l| l.trim().split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// The tail of a narration carried into the next block's continuity context.
/// Roughly the last two sentences, capped so prompts stay small.
fn narration_tail(text: &str) -> String {
    const MAX_CHARS: usize = 400;
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= MAX_CHARS {
        return text.to_string();
    }
    let tail: String = chars[chars.len() - MAX_CHARS..].iter().collect();
    // Cut at the first sentence boundary inside the window.
    match tail.find(". ") {
        Some(pos) => tail[pos + 2..].to_string(),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::builtin_agents;
    use crate::content::SegmentKind;
    use crate::model::ChatReply;
    use async_trait::async_trait;
    use edgequake_llm::CompletionOptions;
    use std::sync::Mutex;

    fn seg(id: &str, title: &str) -> Segment {
        Segment {
            id: id.into(),
            title: title.into(),
            summary: format!("Summary of {title}."),
            narration_notes: format!("Cover {title}."),
            kind: SegmentKind::Concept,
            pages: vec![1],
            prerequisites: Vec::new(),
        }
    }

    /// Replies with a fixed narration and records every request.
    struct Canned {
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Canned {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for Canned {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<ChatReply, LectureError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            Ok(ChatReply {
                content: "Narrated text for this part of the lecture.".into(),
                ..Default::default()
            })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ChatModel for AlwaysFails {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<ChatReply, LectureError> {
            Err(LectureError::LlmApiError {
                message: "boom".into(),
            })
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::builder()
            .retry(crate::retry::Backoff::none())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn blocks_come_back_in_track_order() {
        let model: Arc<dyn ChatModel> = Canned::new();
        let agent = &builtin_agents()[0];
        let segments = vec![seg("seg-001", "Vectors"), seg("seg-002", "Matrices")];

        let outcome = generate_script(&model, &fast_config(), agent, "Algebra", None, &segments)
            .await
            .unwrap();

        let blocks = &outcome.script.blocks;
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].kind, BlockKind::Intro);
        assert_eq!(blocks[1].segment_id.as_deref(), Some("seg-001"));
        assert_eq!(blocks[2].segment_id.as_deref(), Some("seg-002"));
        assert_eq!(blocks[3].kind, BlockKind::Outro);
        assert_eq!(
            blocks.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn failed_blocks_fall_back_to_the_summary() {
        let model: Arc<dyn ChatModel> = Arc::new(AlwaysFails);
        let agent = &builtin_agents()[0];
        let segments = vec![seg("seg-001", "Vectors")];

        let outcome = generate_script(&model, &fast_config(), agent, "Algebra", None, &segments)
            .await
            .unwrap();

        let block = &outcome.script.blocks[1];
        assert!(block.degraded);
        assert_eq!(block.text, "Summary of Vectors.");
        assert_eq!(outcome.warnings.len(), 3); // intro + segment + outro
        assert!(outcome
            .warnings
            .iter()
            .any(|w| matches!(w, StageError::ScriptFailed { segment, .. } if segment == "seg-001")));
    }

    #[tokio::test]
    async fn continuity_mode_threads_the_previous_narration() {
        let canned = Canned::new();
        let model: Arc<dyn ChatModel> = canned.clone();
        let agent = &builtin_agents()[0];
        let config = PipelineConfig::builder()
            .retry(crate::retry::Backoff::none())
            .continuity(true)
            .build()
            .unwrap();

        let segments = vec![seg("seg-001", "Vectors")];
        generate_script(&model, &config, agent, "Algebra", None, &segments)
            .await
            .unwrap();

        let requests = canned.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        // Intro has no context; later blocks carry one extra message.
        assert_eq!(requests[0].len(), 2);
        assert_eq!(requests[1].len(), 3);
        assert_eq!(requests[2].len(), 3);
    }

    #[test]
    fn cleanup_strips_markdown_and_stage_directions() {
        let raw = "## Welcome\n\n**Today** we cover `vectors`.\n\n* first point\n[pause] Then *clears throat* matrices.";
        let clean = clean_narration(raw);
        assert!(!clean.contains('#'));
        assert!(!clean.contains('*'));
        assert!(!clean.contains('`'));
        assert!(!clean.contains("[pause]"));
        assert!(clean.contains("Today we cover vectors."));
        assert!(clean.contains("Then matrices."));
    }

    #[test]
    fn cleanup_preserves_plain_prose() {
        let raw = "A plain sentence. Another one follows it.";
        assert_eq!(clean_narration(raw), raw);
    }

    #[test]
    fn tail_keeps_short_narrations_whole() {
        assert_eq!(narration_tail("short"), "short");
        let long = "x".repeat(500) + ". The final sentence stays.";
        assert!(narration_tail(&long).contains("final sentence"));
    }

    #[test]
    fn empty_agenda_fallbacks_still_read_sensibly() {
        let plans = block_plans("Title", None, &[], &[]);
        assert_eq!(plans.len(), 2);
        assert!(plans[0].fallback.contains("Title"));
        assert!(plans[1].fallback.contains("concludes"));
    }
}
