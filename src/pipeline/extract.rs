//! Legacy analyzer: embedded text plus detected elements, no full-page
//! vision reads.
//!
//! This path predates the vision-first analyzer and stays for documents and
//! deployments the vision path serves badly: born-digital PDFs with clean
//! embedded text, or vision models too weak to read a dense page image.
//! pdfium gives the text and the figure regions directly; the model is only
//! asked to caption visuals it is shown cropped, which is a much easier task
//! than reading a whole page.
//!
//! Output is the same `Vec<Segment>` the vision analyzer produces, so the
//! downstream stages never know which analyzer ran.

use std::sync::Arc;

use edgequake_llm::ChatMessage;
use futures::stream::{self, StreamExt};
use image::GenericImageView;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::content::{Segment, SegmentKind};
use crate::error::{LectureError, StageError};
use crate::model::{analysis_options, ChatModel};
use crate::pipeline::encode::{encode_png, to_image_data};
use crate::pipeline::render::{bind_pdfium, load_document};
use crate::prompts::element_caption_prompt;
use crate::retry::{llm_retryable, with_backoff};
use crate::store::{keys, ObjectStore};

/// A figure/table/formula found on a page before captioning.
#[derive(Debug, Clone)]
pub struct DetectedElement {
    /// 1-indexed position among the page's elements.
    pub index: usize,
    pub kind: SegmentKind,
    /// Fractional page region (0..1 in both axes, origin top-left).
    /// `None` for text-heuristic candidates, which have no crop.
    pub region: Option<FracRect>,
    /// The raw lines that triggered detection (tables/formulas), empty for
    /// image figures.
    pub source_text: String,
}

/// A rectangle in page fractions, independent of render DPI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FracRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Everything pdfium yields for one page.
#[derive(Debug, Clone)]
pub struct PageExtract {
    /// 1-indexed page number.
    pub page: usize,
    pub text: String,
    pub elements: Vec<DetectedElement>,
}

/// Extract embedded text and detect elements for the selected pages.
///
/// Pure pdfium work, so it runs in one `spawn_blocking` pass over the whole
/// document.
pub async fn extract_pages(
    bytes: Vec<u8>,
    config: &PipelineConfig,
    pages: Vec<usize>,
) -> Result<Vec<PageExtract>, LectureError> {
    let password = config.password.clone();
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, &bytes, password.as_deref())?;
        let doc_pages = document.pages();

        let mut extracts = Vec::with_capacity(pages.len());
        for page_no in pages {
            let page = doc_pages.get((page_no - 1) as u16).map_err(|e| {
                debug!("pdfium page access error: {e:?}");
                LectureError::PageOutOfRange {
                    page: page_no,
                    total: doc_pages.len() as usize,
                }
            })?;

            let text = page
                .text()
                .map(|t| t.all())
                .unwrap_or_default();

            let mut elements = detect_figures(&page);
            elements.extend(detect_text_elements(&text, elements.len()));

            debug!(
                "Page {}: {} chars of text, {} elements",
                page_no,
                text.len(),
                elements.len()
            );
            extracts.push(PageExtract {
                page: page_no,
                text,
                elements,
            });
        }
        Ok(extracts)
    })
    .await
    .map_err(|e| LectureError::Internal(format!("Extract task panicked: {e}")))?
}

/// Image objects on the page become figure candidates. Tiny images
/// (logos, bullets, rules) are skipped by area.
fn detect_figures(page: &PdfPage<'_>) -> Vec<DetectedElement> {
    let page_width = page.width().value;
    let page_height = page.height().value;
    if page_width <= 0.0 || page_height <= 0.0 {
        return Vec::new();
    }

    let mut figures = Vec::new();
    for object in page.objects().iter() {
        if object.object_type() != PdfPageObjectType::Image {
            continue;
        }
        let Ok(bounds) = object.bounds() else {
            continue;
        };
        let width = (bounds.right().value - bounds.left().value).abs();
        let height = (bounds.top().value - bounds.bottom().value).abs();
        // Below 2% of the page area it is decoration, not a figure.
        if width * height < 0.02 * page_width * page_height {
            continue;
        }
        figures.push(DetectedElement {
            index: figures.len() + 1,
            kind: SegmentKind::Figure,
            region: Some(FracRect {
                left: (bounds.left().value / page_width).clamp(0.0, 1.0),
                // PDF coordinates grow upwards; image rows grow downwards.
                top: (1.0 - bounds.top().value / page_height).clamp(0.0, 1.0),
                width: (width / page_width).clamp(0.0, 1.0),
                height: (height / page_height).clamp(0.0, 1.0),
            }),
            source_text: String::new(),
        });
    }
    figures
}

/// Table and formula candidates from line heuristics over the embedded text.
fn detect_text_elements(text: &str, index_offset: usize) -> Vec<DetectedElement> {
    let lines: Vec<&str> = text.lines().collect();
    let mut elements = Vec::new();
    let mut run_start: Option<usize> = None;

    // Runs of 2+ columnar lines are one table.
    for i in 0..=lines.len() {
        let columnar = i < lines.len() && looks_columnar(lines[i]);
        match (columnar, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= 2 {
                    elements.push(DetectedElement {
                        index: index_offset + elements.len() + 1,
                        kind: SegmentKind::Table,
                        region: None,
                        source_text: lines[start..i].join("\n"),
                    });
                }
                run_start = None;
            }
            _ => {}
        }
    }

    for line in &lines {
        if looks_like_formula(line) {
            elements.push(DetectedElement {
                index: index_offset + elements.len() + 1,
                kind: SegmentKind::Formula,
                region: None,
                source_text: line.trim().to_string(),
            });
        }
    }

    elements
}

/// Columnar lines have several cells separated by pipes, tabs or runs of
/// spaces.
fn looks_columnar(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.len() < 8 {
        return false;
    }
    let pipes = trimmed.matches('|').count();
    let gaps = trimmed.split("  ").filter(|s| !s.trim().is_empty()).count();
    pipes >= 2 || trimmed.contains('\t') || gaps >= 3
}

/// Formula lines are dense in operators and math symbols and sparse in
/// ordinary words.
fn looks_like_formula(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.len() < 6 || trimmed.len() > 200 {
        return false;
    }
    let math = trimmed
        .chars()
        .filter(|c| "=+−-×·/^_∑∏∫√≤≥≈∂∇λμσπθαβγΔ".contains(*c))
        .count();
    if math < 2 || !trimmed.contains('=') {
        return false;
    }
    let words = trimmed
        .split_whitespace()
        .filter(|w| w.len() > 2 && w.chars().all(|c| c.is_ascii_alphabetic()))
        .count();
    words <= 3
}

/// Crop an element's region out of the stored page PNG.
///
/// Returns `None` when the region degenerates to nothing after clamping.
pub fn crop_region(png: &[u8], region: FracRect) -> Option<Vec<u8>> {
    let img = image::load_from_memory(png).ok()?;
    let (w, h) = img.dimensions();
    let x = (region.left * w as f32) as u32;
    let y = (region.top * h as f32) as u32;
    let cw = ((region.width * w as f32) as u32).min(w.saturating_sub(x));
    let ch = ((region.height * h as f32) as u32).min(h.saturating_sub(y));
    if cw < 8 || ch < 8 {
        return None;
    }
    let cropped = img.crop_imm(x, y, cw, ch);
    encode_png(&cropped, 0).ok()
}

/// Caption one element with a vision (or text) call. Never fatal: a failed
/// caption yields a generic description plus a warning.
pub async fn describe_element(
    model: &Arc<dyn ChatModel>,
    config: &PipelineConfig,
    page: usize,
    element: &DetectedElement,
    page_png: Option<&[u8]>,
) -> (String, Option<StageError>) {
    let prompt = element_caption_prompt(element.kind);
    let user = match element.region.and_then(|r| page_png.and_then(|png| crop_region(png, r))) {
        Some(crop) => ChatMessage::user_with_images(
            "Describe this for the lecture.",
            vec![to_image_data(&crop)],
        ),
        None => ChatMessage::user(format!(
            "Describe this for the lecture. It appears in the document as:\n\n{}",
            element.source_text
        )),
    };
    let messages = vec![ChatMessage::system(prompt), user];
    let options = analysis_options(config);
    let label = format!("page {page} element {}", element.index);

    let outcome = with_backoff(&config.retry, &label, llm_retryable, || {
        let model = Arc::clone(model);
        let messages = messages.clone();
        let options = options.clone();
        async move {
            let reply = model.chat(&messages, &options).await?;
            let caption = reply.content.trim().to_string();
            if caption.is_empty() {
                return Err(LectureError::InvalidModelReply {
                    detail: "empty caption".into(),
                });
            }
            Ok(caption)
        }
    })
    .await;

    match outcome {
        Ok(attempted) => (attempted.value, None),
        Err(e) => {
            warn!("{label}: caption failed, using generic description: {e}");
            let noun = kind_noun(element.kind);
            (
                format!("The page also contains a {noun} that could not be described."),
                Some(StageError::CaptionFailed {
                    page,
                    element: element.index,
                    detail: e.to_string(),
                }),
            )
        }
    }
}

fn kind_noun(kind: SegmentKind) -> &'static str {
    match kind {
        SegmentKind::Table => "table",
        SegmentKind::Formula => "formula",
        _ => "figure",
    }
}

/// What the legacy analyzer hands back, shaped like the vision analyzer's
/// outcome so the worker treats both identically.
#[derive(Debug, Clone)]
pub struct LegacyOutcome {
    /// Segments in reading order, captions folded in. Not yet ordered.
    pub segments: Vec<Segment>,
    pub warnings: Vec<StageError>,
}

/// Run the whole legacy analysis: text segments per page plus one captioned
/// segment per detected element.
pub async fn legacy_analyze(
    model: &Arc<dyn ChatModel>,
    objects: &Arc<dyn ObjectStore>,
    config: &PipelineConfig,
    job_id: &str,
    bytes: Vec<u8>,
    pages: Vec<usize>,
) -> Result<LegacyOutcome, LectureError> {
    let extracts = extract_pages(bytes, config, pages).await?;

    // Caption calls fan out bounded by `concurrency`, like page analysis.
    let caption_jobs: Vec<(usize, DetectedElement)> = extracts
        .iter()
        .flat_map(|ex| ex.elements.iter().cloned().map(move |el| (ex.page, el)))
        .collect();

    let mut captioned: Vec<(usize, usize, SegmentKind, String, Option<StageError>)> =
        stream::iter(caption_jobs.into_iter().map(|(page, element)| {
            let model = Arc::clone(model);
            let objects = Arc::clone(objects);
            let config = config.clone();
            let job_id = job_id.to_string();
            async move {
                let png = if element.region.is_some() {
                    objects.get(&keys::page_image(&job_id, page)).await.ok()
                } else {
                    None
                };
                let (caption, warning) =
                    describe_element(&model, &config, page, &element, png.as_deref()).await;
                (page, element.index, element.kind, caption, warning)
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;
    captioned.sort_by_key(|(page, index, ..)| (*page, *index));

    let warnings: Vec<StageError> = captioned
        .iter()
        .filter_map(|(.., warning)| warning.clone())
        .collect();

    let mut segments = Vec::new();
    for extract in &extracts {
        if let Some(seg) = text_segment(extract, segments.len() + 1) {
            segments.push(seg);
        }
        for (page, _, kind, caption, _) in captioned.iter().filter(|(p, ..)| *p == extract.page)
        {
            segments.push(Segment {
                id: format!("seg-{:03}", segments.len() + 1),
                title: format!("{} on page {}", title_noun(*kind), page),
                summary: caption.clone(),
                narration_notes: caption.clone(),
                kind: *kind,
                pages: vec![*page],
                prerequisites: Vec::new(),
            });
        }
    }

    info!(
        "Job {}: legacy analysis produced {} segments ({} caption failures)",
        job_id,
        segments.len(),
        warnings.len()
    );
    Ok(LegacyOutcome { segments, warnings })
}

/// One text segment per page with usable embedded text.
fn text_segment(extract: &PageExtract, ordinal: usize) -> Option<Segment> {
    let text = extract.text.trim();
    if text.len() < 40 {
        return None;
    }
    let title = text
        .lines()
        .map(str::trim)
        .find(|l| l.len() >= 4 && !looks_columnar(l))
        .map(|l| truncate_chars(l, 60))
        .unwrap_or_else(|| format!("Page {}", extract.page));
    let summary = truncate_chars(text, 400);

    Some(Segment {
        id: format!("seg-{ordinal:03}"),
        title,
        summary,
        narration_notes: truncate_chars(text, 2000),
        kind: SegmentKind::Concept,
        pages: vec![extract.page],
        prerequisites: Vec::new(),
    })
}

fn title_noun(kind: SegmentKind) -> &'static str {
    match kind {
        SegmentKind::Table => "Table",
        SegmentKind::Formula => "Formula",
        _ => "Figure",
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columnar_lines_are_detected() {
        assert!(looks_columnar("cell one | cell two | cell three"));
        assert!(looks_columnar("alpha   12.3   45.6   78.9"));
        assert!(!looks_columnar("An ordinary prose sentence."));
        assert!(!looks_columnar("x | y"));
    }

    #[test]
    fn formula_lines_are_detected() {
        assert!(looks_like_formula("E = m c^2 + p^2"));
        assert!(looks_like_formula("σ = √(Σ(x − μ)^2 / n)"));
        assert!(!looks_like_formula("The equation is discussed below."));
        assert!(!looks_like_formula("x=1"));
    }

    #[test]
    fn table_runs_need_two_lines() {
        let text = "Intro prose.\na | b | c\n1 | 2 | 3\nMore prose.\nlone | cell | row\n";
        let elements = detect_text_elements(text, 0);
        let tables: Vec<_> = elements
            .iter()
            .filter(|e| e.kind == SegmentKind::Table)
            .collect();
        assert_eq!(tables.len(), 1);
        assert!(tables[0].source_text.contains("1 | 2 | 3"));
    }

    #[test]
    fn text_segment_titles_from_first_line() {
        let extract = PageExtract {
            page: 3,
            text: "Gradient Descent\nWe minimise the loss by stepping against the gradient, \
                   repeating until convergence."
                .into(),
            elements: vec![],
        };
        let seg = text_segment(&extract, 1).unwrap();
        assert_eq!(seg.title, "Gradient Descent");
        assert_eq!(seg.pages, vec![3]);
        assert_eq!(seg.id, "seg-001");
    }

    #[test]
    fn near_empty_pages_yield_no_text_segment() {
        let extract = PageExtract {
            page: 1,
            text: "  7  ".into(),
            elements: vec![],
        };
        assert!(text_segment(&extract, 1).is_none());
    }

    #[test]
    fn crop_rejects_degenerate_regions() {
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::new(100, 100));
        let png = encode_png(&img, 1).unwrap();
        let r = FracRect {
            left: 0.99,
            top: 0.99,
            width: 0.5,
            height: 0.5,
        };
        assert!(crop_region(&png, r).is_none());

        let ok = FracRect {
            left: 0.1,
            top: 0.1,
            width: 0.5,
            height: 0.5,
        };
        let cropped = crop_region(&png, ok).unwrap();
        assert_eq!(&cropped[1..4], b"PNG");
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = "é".repeat(20);
        let cut = truncate_chars(&long, 5);
        assert!(cut.starts_with("ééééé"));
        assert!(cut.ends_with('…'));
    }
}
