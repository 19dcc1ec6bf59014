//! Vision analysis: stored page images in, merged lecture segments out.
//!
//! One model call per page returns that page's segments as JSON. A page
//! that exhausts its retries is recorded and skipped — the lecture carries
//! on without it — but a document where *every* page failed aborts with
//! [`LectureError::AllPagesFailed`], because the lecture would be empty.
//!
//! Cross-page merging happens here too: models describe the same topic on
//! consecutive pages ("Results", "Results (cont.)"), and those must become
//! one segment before ordering, or the lecture repeats itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use edgequake_llm::{ChatMessage, ImageData};
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::content::{PageAnalysis, Segment};
use crate::error::{LectureError, StageError};
use crate::job::StageKind;
use crate::model::{analysis_options, ChatModel};
use crate::pipeline::encode::to_image_data;
use crate::pipeline::parse::parse_page_segments;
use crate::prompts::PAGE_ANALYSIS_PROMPT;
use crate::retry::{llm_retryable, with_backoff};
use crate::store::{keys, ObjectStore};

/// Everything the analyze stage produces.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Merged segments in first-appearance (page) order, prerequisites
    /// resolved to ids. Not yet topologically ordered.
    pub segments: Vec<Segment>,
    /// Per-page records, ascending by page, including failures.
    pub pages: Vec<PageAnalysis>,
    /// One warning per skipped page.
    pub warnings: Vec<StageError>,
}

/// Run vision analysis over the rendered pages of a job.
///
/// `pages` are the 1-indexed page numbers the render stage uploaded; each
/// image is fetched back from the store by computed key, never by listing.
pub async fn analyze_pages(
    model: &Arc<dyn ChatModel>,
    objects: &Arc<dyn ObjectStore>,
    config: &PipelineConfig,
    job_id: &str,
    pages: &[usize],
) -> Result<AnalysisOutcome, LectureError> {
    let total = pages.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(StageKind::Analyze, total);
    }

    let mut images = Vec::with_capacity(total);
    for &page in pages {
        let png = objects.get(&keys::page_image(job_id, page)).await?;
        images.push((page, to_image_data(&png)));
    }

    let mut analyses: Vec<PageAnalysis> = stream::iter(images.into_iter().map(|(page, image)| {
        let model = Arc::clone(model);
        let config = config.clone();
        async move {
            let result = analyze_page(&model, &config, page, image).await;
            if let Some(ref cb) = config.progress_callback {
                match &result.error {
                    None => cb.on_unit_complete(StageKind::Analyze, page, total),
                    Some(e) => cb.on_unit_error(StageKind::Analyze, page, &e.to_string()),
                }
            }
            result
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    analyses.sort_by_key(|a| a.page);

    let warnings: Vec<StageError> = analyses.iter().filter_map(|a| a.error.clone()).collect();
    if !analyses.is_empty() && warnings.len() == analyses.len() {
        let first_error = warnings
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".into());
        return Err(LectureError::AllPagesFailed {
            total,
            retries: config.retry.max_retries,
            first_error,
        });
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_complete(StageKind::Analyze, total - warnings.len(), total);
    }

    let segments = merge_pages(&analyses);
    info!(
        "Job {}: {} segments from {} pages ({} skipped)",
        job_id,
        segments.len(),
        total,
        warnings.len()
    );

    Ok(AnalysisOutcome {
        segments,
        pages: analyses,
        warnings,
    })
}

/// Analyse a single page image. Always returns a record — a failed page
/// carries its error instead of aborting the document.
pub async fn analyze_page(
    model: &Arc<dyn ChatModel>,
    config: &PipelineConfig,
    page: usize,
    image: ImageData,
) -> PageAnalysis {
    let start = Instant::now();
    let prompt = config
        .analysis_prompt
        .as_deref()
        .unwrap_or(PAGE_ANALYSIS_PROMPT);
    let messages = vec![
        ChatMessage::system(prompt),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = analysis_options(config);
    let label = format!("page {page}");

    let outcome = with_backoff(&config.retry, &label, llm_retryable, || {
        let model = Arc::clone(model);
        let messages = messages.clone();
        let options = options.clone();
        async move {
            let reply = model.chat(&messages, &options).await?;
            let segments = parse_page_segments(&reply.content)?;
            Ok((reply, segments))
        }
    })
    .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(attempted) => {
            let (reply, segments) = attempted.value;
            debug!(
                "Page {}: {} segments, {} input tokens, {} output tokens, {}ms",
                page,
                segments.len(),
                reply.input_tokens,
                reply.output_tokens,
                duration_ms
            );
            PageAnalysis {
                page,
                segments,
                input_tokens: reply.input_tokens,
                output_tokens: reply.output_tokens,
                duration_ms,
                retries: attempted.retries as u8,
                error: None,
            }
        }
        Err(e) => PageAnalysis {
            page,
            segments: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms,
            retries: config.retry.max_retries as u8,
            error: Some(StageError::AnalysisFailed {
                page,
                retries: config.retry.max_retries as u8,
                detail: e.to_string(),
            }),
        },
    }
}

/// Merge per-page raw segments into document-level segments.
///
/// Titles matching case- and whitespace-insensitively are the same topic:
/// their page lists union, the longest summary wins, and narration notes
/// accumulate. Free-text prerequisite titles resolve to segment ids;
/// unknown titles and self-references drop silently, since a dangling edge
/// would either panic the ordering pass or deadlock it.
pub fn merge_pages(analyses: &[PageAnalysis]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut by_title: HashMap<String, usize> = HashMap::new();
    let mut raw_prereqs: Vec<Vec<String>> = Vec::new();

    for analysis in analyses {
        for raw in &analysis.segments {
            let title = raw.title.trim();
            if title.is_empty() {
                continue;
            }
            match by_title.get(&normalise_title(title)) {
                Some(&i) => {
                    let seg = &mut segments[i];
                    if !seg.pages.contains(&analysis.page) {
                        seg.pages.push(analysis.page);
                    }
                    if raw.summary.trim().len() > seg.summary.len() {
                        seg.summary = raw.summary.trim().to_string();
                    }
                    let narration = raw.narration.trim();
                    if !narration.is_empty() && !seg.narration_notes.contains(narration) {
                        if !seg.narration_notes.is_empty() {
                            seg.narration_notes.push('\n');
                        }
                        seg.narration_notes.push_str(narration);
                    }
                    raw_prereqs[i].extend(raw.prerequisites.iter().cloned());
                }
                None => {
                    by_title.insert(normalise_title(title), segments.len());
                    raw_prereqs.push(raw.prerequisites.clone());
                    segments.push(Segment {
                        id: format!("seg-{:03}", segments.len() + 1),
                        title: title.to_string(),
                        summary: raw.summary.trim().to_string(),
                        narration_notes: raw.narration.trim().to_string(),
                        kind: raw.kind,
                        pages: vec![analysis.page],
                        prerequisites: Vec::new(),
                    });
                }
            }
        }
    }

    for (i, titles) in raw_prereqs.iter().enumerate() {
        let own_id = segments[i].id.clone();
        let mut ids: Vec<String> = titles
            .iter()
            .filter_map(|t| by_title.get(&normalise_title(t)))
            .map(|&j| segments[j].id.clone())
            .filter(|id| *id != own_id)
            .collect();
        ids.sort();
        ids.dedup();
        segments[i].prerequisites = ids;
    }

    segments
}

fn normalise_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
