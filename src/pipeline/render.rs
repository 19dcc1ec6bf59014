//! PDF rasterisation: render selected pages to PNG via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the blocking
//! thread pool, so Tokio worker threads never stall during CPU-heavy
//! rendering. Pages are PNG-encoded inside the same blocking task; only the
//! store uploads happen back on the async side.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and matching the
//! image-size sweet spot for vision models (around 1,024–2,048 px).

use std::sync::Arc;

use pdfium_render::prelude::*;
use tracing::{debug, info};

use crate::config::{PageSelection, PipelineConfig};
use crate::content::DocumentMetadata;
use crate::error::LectureError;
use crate::pipeline::encode::encode_png;
use crate::store::{keys, ObjectStore};

/// What the render stage produced for one job.
#[derive(Debug, Clone)]
pub struct RenderedPages {
    /// Total pages in the document, regardless of selection.
    pub page_count: usize,
    /// 1-indexed pages that were rendered and uploaded, ascending.
    pub rendered: Vec<usize>,
    pub metadata: DocumentMetadata,
}

/// Rasterise the selected pages and upload each as
/// `{job_id}_pages/page_{n}.png`.
pub async fn render_to_store(
    objects: &Arc<dyn ObjectStore>,
    job_id: &str,
    bytes: Vec<u8>,
    config: &PipelineConfig,
) -> Result<RenderedPages, LectureError> {
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();
    let selection = config.pages.clone();

    let (page_count, pages, metadata) = tokio::task::spawn_blocking(move || {
        render_blocking(&bytes, dpi, max_pixels, password.as_deref(), &selection)
    })
    .await
    .map_err(|e| LectureError::Internal(format!("Render task panicked: {e}")))??;

    let mut rendered = Vec::with_capacity(pages.len());
    for (page_no, png) in pages {
        objects
            .put(&keys::page_image(job_id, page_no), &png)
            .await?;
        rendered.push(page_no);
    }

    info!(
        "Job {}: rendered {}/{} pages",
        job_id,
        rendered.len(),
        page_count
    );
    Ok(RenderedPages {
        page_count,
        rendered,
        metadata,
    })
}

/// Blocking implementation: open, render, PNG-encode.
fn render_blocking(
    bytes: &[u8],
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
    selection: &PageSelection,
) -> Result<(usize, Vec<(usize, Vec<u8>)>, DocumentMetadata), LectureError> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, bytes, password)?;

    let metadata = read_metadata(&document);
    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let indices = selection.to_indices(total_pages);
    if indices.is_empty() {
        return Err(LectureError::PageOutOfRange {
            page: first_requested_page(selection),
            total: total_pages,
        });
    }

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(indices.len());
    for idx in indices {
        let page_no = idx + 1;
        let page = pages
            .get(idx as u16)
            .map_err(|e| LectureError::RasterisationFailed {
                page: page_no,
                detail: format!("{:?}", e),
            })?;

        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| LectureError::RasterisationFailed {
                    page: page_no,
                    detail: format!("{:?}", e),
                })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_no,
            image.width(),
            image.height()
        );

        results.push((page_no, encode_png(&image, page_no)?));
    }

    Ok((total_pages, results, metadata))
}

/// Read document metadata without touching the pipeline.
pub async fn inspect(
    bytes: Vec<u8>,
    password: Option<String>,
) -> Result<DocumentMetadata, LectureError> {
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, &bytes, password.as_deref())?;
        Ok(read_metadata(&document))
    })
    .await
    .map_err(|e| LectureError::Internal(format!("Metadata task panicked: {e}")))?
}

/// Bind a pdfium library: `PDFIUM_DYNAMIC_LIB_PATH` first when set, then a
/// library next to the executable, then the system library.
pub(crate) fn bind_pdfium() -> Result<Pdfium, LectureError> {
    let bindings = match std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        Ok(dir) if !dir.is_empty() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| LectureError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

pub(crate) fn load_document<'a>(
    pdfium: &'a Pdfium,
    bytes: &'a [u8],
    password: Option<&str>,
) -> Result<PdfDocument<'a>, LectureError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| LectureError::CorruptPdf {
            detail: format!("{:?}", e),
        })
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    }
}

/// The page a caller most plausibly meant when their selection matched
/// nothing, for the error message.
fn first_requested_page(selection: &PageSelection) -> usize {
    match selection {
        PageSelection::All => 1,
        PageSelection::Single(p) => *p,
        PageSelection::Range(start, _) => *start,
        PageSelection::Set(pages) => pages.iter().copied().min().unwrap_or(1),
    }
}
