//! Error types for the pdf2lecture library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`LectureError`] — **Fatal**: the lecture cannot be produced at all
//!   (bad input file, provider not configured, every page failed). Returned
//!   as `Err(LectureError)` from the top-level `compose*` functions and the
//!   HTTP handlers.
//!
//! * [`StageError`] — **Non-fatal**: a single unit of work failed (one page's
//!   analysis, one figure caption, one script block) but the rest of the
//!   lecture is fine. Stored inside the owning record so callers can inspect
//!   partial success rather than losing the whole lecture to one bad page.
//!
//! The separation lets callers decide their own tolerance: abort on the first
//! degraded stage, log and continue, or collect all errors for a post-run
//! report.

use std::path::PathBuf;

use http::StatusCode;
use thiserror::Error;

/// All fatal errors returned by the pdf2lecture library.
///
/// Unit-level failures use [`StageError`] and are stored in the stage records
/// on [`crate::job::Job`] rather than propagated here.
#[derive(Debug, Error)]
pub enum LectureError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The upload exists and was read, but is not a PDF.
    #[error("'{name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: [u8; 4] },

    /// The upload exceeds the configured size cap.
    #[error("PDF is {size} bytes, which exceeds the {max} byte limit\nSplit the document or raise the upload limit.")]
    PdfTooLarge { size: usize, max: usize },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt (or encrypted) and cannot be opened.
    #[error("PDF cannot be opened: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { detail: String },

    /// A requested page number exceeds the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned a non-retryable error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The model replied, but not with the JSON shape the stage asked for.
    #[error("Model reply could not be parsed: {detail}")]
    InvalidModelReply { detail: String },

    /// VLM API returned HTTP 429 — caller should back off.
    ///
    /// Check `retry_after_secs` for a server-specified delay, or use
    /// exponential backoff if `None`.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimitExceeded {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// VLM API returned an authentication error (401/403) — retry unlikely to help.
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    /// Every page failed analysis after all retries; the lecture would be empty.
    #[error("All {total} pages failed after {retries} retries each.\nFirst error: {first_error}")]
    AllPagesFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    // ── Speech errors ─────────────────────────────────────────────────────
    /// The TTS provider rejected or failed a synthesis call.
    #[error("Speech API error: {detail}")]
    SpeechApiError { detail: String },

    /// An audio block could not be synthesised after retries.
    ///
    /// Audio failures are fatal: a hole in the track would desynchronise
    /// every later word timing.
    #[error("Speech synthesis failed for block {block}: {detail}")]
    AudioFailed { block: usize, detail: String },

    // ── Job and storage errors ────────────────────────────────────────────
    /// No job with the given id.
    #[error("Lecture job '{id}' not found")]
    JobNotFound { id: String },

    /// No lecture agent with the given id.
    #[error("Lecture agent '{id}' not found")]
    AgentNotFound { id: String },

    /// The object store has no value for the key.
    #[error("Stored object '{key}' not found")]
    ObjectNotFound { key: String },

    /// The requested artefact exists but its stage has not completed yet.
    #[error("Lecture '{job}' is not ready: {detail}\nPoll GET /v1/lectures/{job} until the stage completes.")]
    NotReady { job: String, detail: String },

    /// Backend storage failed (filesystem or S3).
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON (de)serialisation failed.
    #[error("JSON error: {0}")]
    Json(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install the pdfium shared library and point PDFIUM_DYNAMIC_LIB_PATH at it,\n\
or place libpdfium next to the executable.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for LectureError {
    fn from(e: std::io::Error) -> Self {
        LectureError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for LectureError {
    fn from(e: serde_json::Error) -> Self {
        LectureError::Json(e.to_string())
    }
}

impl LectureError {
    /// HTTP status for this error. Usable without the `server` feature so
    /// library callers can build their own responses.
    pub fn status_code(&self) -> StatusCode {
        match self {
            LectureError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            LectureError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            LectureError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            LectureError::DownloadFailed { .. } => StatusCode::BAD_GATEWAY,
            LectureError::DownloadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            LectureError::NotAPdf { .. } => StatusCode::BAD_REQUEST,
            LectureError::PdfTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            LectureError::CorruptPdf { .. } => StatusCode::BAD_REQUEST,
            LectureError::PageOutOfRange { .. } => StatusCode::NOT_FOUND,
            LectureError::RasterisationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            LectureError::ProviderNotConfigured { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            LectureError::LlmApiError { .. } => StatusCode::BAD_GATEWAY,
            LectureError::InvalidModelReply { .. } => StatusCode::BAD_GATEWAY,
            LectureError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            LectureError::AuthError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            LectureError::AllPagesFailed { .. } => StatusCode::BAD_GATEWAY,
            LectureError::SpeechApiError { .. } => StatusCode::BAD_GATEWAY,
            LectureError::AudioFailed { .. } => StatusCode::BAD_GATEWAY,
            LectureError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            LectureError::AgentNotFound { .. } => StatusCode::NOT_FOUND,
            LectureError::ObjectNotFound { .. } => StatusCode::NOT_FOUND,
            LectureError::NotReady { .. } => StatusCode::CONFLICT,
            LectureError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LectureError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LectureError::OutputWriteFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            LectureError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            LectureError::PdfiumBindingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LectureError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            LectureError::FileNotFound { .. } => "file_not_found",
            LectureError::PermissionDenied { .. } => "permission_denied",
            LectureError::InvalidInput { .. } => "invalid_input",
            LectureError::DownloadFailed { .. } => "download_failed",
            LectureError::DownloadTimeout { .. } => "download_timeout",
            LectureError::NotAPdf { .. } => "not_a_pdf",
            LectureError::PdfTooLarge { .. } => "pdf_too_large",
            LectureError::CorruptPdf { .. } => "corrupt_pdf",
            LectureError::PageOutOfRange { .. } => "page_out_of_range",
            LectureError::RasterisationFailed { .. } => "rasterisation_failed",
            LectureError::ProviderNotConfigured { .. } => "provider_not_configured",
            LectureError::LlmApiError { .. } => "llm_api_error",
            LectureError::InvalidModelReply { .. } => "invalid_model_reply",
            LectureError::RateLimitExceeded { .. } => "rate_limited",
            LectureError::AuthError { .. } => "auth_error",
            LectureError::AllPagesFailed { .. } => "all_pages_failed",
            LectureError::SpeechApiError { .. } => "speech_api_error",
            LectureError::AudioFailed { .. } => "audio_failed",
            LectureError::JobNotFound { .. } => "job_not_found",
            LectureError::AgentNotFound { .. } => "agent_not_found",
            LectureError::ObjectNotFound { .. } => "object_not_found",
            LectureError::NotReady { .. } => "not_ready",
            LectureError::Storage(_) => "storage_error",
            LectureError::Json(_) => "json_error",
            LectureError::OutputWriteFailed { .. } => "output_write_failed",
            LectureError::InvalidConfig(_) => "invalid_config",
            LectureError::PdfiumBindingFailed(_) => "pdfium_binding_failed",
            LectureError::Internal(_) => "internal_error",
        }
    }
}

/// A non-fatal error for a single unit of pipeline work.
///
/// Stored on the owning page/segment/stage record when a unit fails.
/// The overall lecture continues unless ALL units of a stage fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// Vision analysis of one page failed after retries.
    #[error("Page {page}: analysis failed after {retries} retries: {detail}")]
    AnalysisFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// A figure/table/formula caption call failed; a generic caption was used.
    #[error("Page {page}, element {element}: caption failed: {detail}")]
    CaptionFailed {
        page: usize,
        element: usize,
        detail: String,
    },

    /// Script generation for one segment failed; the summary was narrated verbatim.
    #[error("Segment '{segment}': script generation failed after {retries} retries: {detail}")]
    ScriptFailed {
        segment: String,
        retries: u8,
        detail: String,
    },
}

// ── HTTP response body (server feature) ───────────────────────────────────

/// JSON body returned for every handler error.
#[cfg(feature = "server")]
#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[cfg(feature = "server")]
impl axum::response::IntoResponse for LectureError {
    fn into_response(self) -> axum::response::Response {
        // Display strings put the human hint on the lines after the first;
        // the first line is the message and the rest becomes the suggestion.
        let status = self.status_code();
        let text = self.to_string();
        let mut parts = text.splitn(2, '\n');
        let message = parts.next().unwrap_or_default().to_string();
        let suggestion = parts
            .next()
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|s| !s.is_empty());

        let body = ErrorResponse {
            error: self.error_code().to_string(),
            message,
            suggestion,
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_pages_failed_display() {
        let e = LectureError::AllPagesFailed {
            total: 10,
            retries: 3,
            first_error: "boom".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 10 pages"), "got: {msg}");
        assert!(msg.contains("boom"));
    }

    #[test]
    fn rate_limit_display_with_retry() {
        let e = LectureError::RateLimitExceeded {
            provider: "openai".into(),
            retry_after_secs: Some(60),
        };
        assert!(e.to_string().contains("openai"));
    }

    #[test]
    fn pdf_too_large_maps_to_413() {
        let e = LectureError::PdfTooLarge {
            size: 99,
            max: 10,
        };
        assert_eq!(e.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(e.error_code(), "pdf_too_large");
    }

    #[test]
    fn not_found_family_maps_to_404() {
        for e in [
            LectureError::JobNotFound { id: "j".into() },
            LectureError::AgentNotFound { id: "a".into() },
            LectureError::ObjectNotFound { key: "k".into() },
        ] {
            assert_eq!(e.status_code(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn not_ready_maps_to_409() {
        let e = LectureError::NotReady {
            job: "j1".into(),
            detail: "audio still synthesising".into(),
        };
        assert_eq!(e.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn stage_error_display_names_the_unit() {
        let e = StageError::ScriptFailed {
            segment: "seg-003".into(),
            retries: 2,
            detail: "timeout".into(),
        };
        assert!(e.to_string().contains("seg-003"));
    }

    #[test]
    fn io_error_converts_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let e: LectureError = io.into();
        assert!(matches!(e, LectureError::Storage(_)));
    }
}
