//! Configuration types for the PDF-to-lecture pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across worker tasks, log them, and diff two runs
//! to understand why their lectures differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use std::fmt;
use std::sync::Arc;

use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};

use crate::error::LectureError;
use crate::model::ChatModel;
use crate::progress::ProgressCallback;
use crate::retry::Backoff;
use crate::tts::SpeechSynthesizer;

/// Configuration for producing a lecture from a PDF.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2lecture::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(150)
///     .concurrency(10)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    ///
    /// 150 DPI is the sweet spot: text is sharp enough for a VLM to read
    /// reliably, while image file sizes stay well below typical API upload
    /// limits (~20 MB). Increase to 200–300 for small-font documents.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap independent of DPI. A 200-DPI render of an A0 poster could
    /// produce a 13 000 × 18 000 px image and exhaust memory. This field caps
    /// either dimension, scaling the other proportionally.
    pub max_rendered_pixels: u32,

    /// Number of concurrent VLM/TTS API calls. Default: 10.
    ///
    /// Both kinds of API are network-bound, not CPU-bound. Issuing 10 calls
    /// at once typically cuts wall-clock time by 8–9× compared to sequential
    /// processing. If you hit rate-limit errors (`429`), lower this.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4o", "claude-sonnet-4-20250514".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected from the
    /// environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed chat seam. Takes precedence over everything else.
    ///
    /// This is the injection point for canned models in tests and for callers
    /// that wrap a provider with middleware (caching, rate limiting).
    pub chat_model: Option<Arc<dyn ChatModel>>,

    /// Pre-constructed speech synthesizer. If None, the audio stage picks
    /// Polly when the `polly` feature is enabled and credentials resolve,
    /// falling back to the offline mock synthesizer.
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,

    /// Sampling temperature for page analysis. Default: 0.1.
    ///
    /// Low temperature makes the model deterministic and faithful to what it
    /// sees on the page — exactly what you want when extracting structure.
    pub analysis_temperature: f32,

    /// Sampling temperature for script generation. Default: 0.7.
    ///
    /// Narration should sound like a person, not a transcript. A warmer
    /// temperature lets the agent's persona come through without drifting
    /// from the segment content.
    pub script_temperature: f32,

    /// Maximum tokens the LLM may generate per call. Default: 4096.
    ///
    /// Dense pages and chatty agents can exceed 2 000 output tokens. Setting
    /// this too low silently truncates narration mid-sentence.
    pub max_tokens: usize,

    /// Retry policy applied to every LLM and TTS call.
    ///
    /// Most 5xx and timeout errors are transient. The default (3 retries,
    /// 500 ms doubling backoff) catches the vast majority without blocking
    /// the pipeline for long. Auth errors are never retried.
    pub retry: Backoff,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom page-analysis system prompt. If None, uses the built-in default.
    pub analysis_prompt: Option<String>,

    /// How pages are turned into segments. Default: [`AnalysisMode::Vision`].
    pub mode: AnalysisMode,

    /// Sequential script mode: pass each finished block's narration as
    /// context to the next segment's call. Default: false.
    ///
    /// **Why it helps:** the model does not inherently know that segment 3
    /// continues the argument of segment 2. Passing the prior narration lets
    /// it write transitions ("as we just saw…") instead of restarting.
    ///
    /// **The trade-off:** continuity forces segments to be scripted one at a
    /// time (concurrency is effectively 1). Enable it for long course-style
    /// material; leave it off for reference documents.
    pub continuity: bool,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Read title/author from PDF metadata for the lecture introduction.
    /// Default: true.
    pub extract_metadata: bool,

    /// Upload size cap in bytes. Default: 50 MiB.
    pub max_pdf_bytes: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-stage progress callback (drives the CLI progress bar).
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 10,
            model: None,
            provider_name: None,
            provider: None,
            chat_model: None,
            synthesizer: None,
            analysis_temperature: 0.1,
            script_temperature: 0.7,
            max_tokens: 4096,
            retry: Backoff::default(),
            password: None,
            analysis_prompt: None,
            mode: AnalysisMode::default(),
            continuity: false,
            pages: PageSelection::default(),
            extract_metadata: true,
            max_pdf_bytes: 50 * 1024 * 1024,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("chat_model", &self.chat_model.as_ref().map(|_| "<dyn ChatModel>"))
            .field(
                "synthesizer",
                &self.synthesizer.as_ref().map(|_| "<dyn SpeechSynthesizer>"),
            )
            .field("analysis_temperature", &self.analysis_temperature)
            .field("script_temperature", &self.script_temperature)
            .field("max_tokens", &self.max_tokens)
            .field("retry", &self.retry)
            .field("mode", &self.mode)
            .field("continuity", &self.continuity)
            .field("pages", &self.pages)
            .field("max_pdf_bytes", &self.max_pdf_bytes)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.config.chat_model = Some(model);
        self
    }

    pub fn synthesizer(mut self, tts: Arc<dyn SpeechSynthesizer>) -> Self {
        self.config.synthesizer = Some(tts);
        self
    }

    pub fn analysis_temperature(mut self, t: f32) -> Self {
        self.config.analysis_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn script_temperature(mut self, t: f32) -> Self {
        self.config.script_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay = std::time::Duration::from_millis(ms);
        self
    }

    pub fn retry(mut self, policy: Backoff) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn analysis_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.analysis_prompt = Some(prompt.into());
        self
    }

    pub fn mode(mut self, mode: AnalysisMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn continuity(mut self, v: bool) -> Self {
        self.config.continuity = v;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn extract_metadata(mut self, v: bool) -> Self {
        self.config.extract_metadata = v;
        self
    }

    pub fn max_pdf_bytes(mut self, n: usize) -> Self {
        self.config.max_pdf_bytes = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, LectureError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(LectureError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(LectureError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_pdf_bytes < 1024 {
            return Err(LectureError::InvalidConfig(format!(
                "Upload cap must be at least 1 KiB, got {} bytes",
                c.max_pdf_bytes
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How page content becomes lecture segments.
///
/// Two paths exist because they fail differently. The vision path sends each
/// page image to the model once and gets segments back directly; it handles
/// scanned documents and complex layouts but depends entirely on the model's
/// reading. The legacy path extracts embedded text and detected
/// figures/tables itself, asks the model only to caption visuals and order
/// topics, and so keeps working when the vision model is weak or unavailable
/// for full pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Per-page vision analysis produces segments directly. (default)
    #[default]
    Vision,
    /// Embedded-text extraction + element detection + caption calls + a
    /// separate ordering call.
    Legacy,
}

impl std::str::FromStr for AnalysisMode {
    type Err = LectureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vision" => Ok(AnalysisMode::Vision),
            "legacy" => Ok(AnalysisMode::Legacy),
            other => Err(LectureError::InvalidInput {
                input: format!("mode '{other}' (expected 'vision' or 'legacy')"),
            }),
        }
    }
}

/// Specifies which pages of the PDF to lecture on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed
    /// page numbers, dropping anything past `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_out_of_range_values() {
        let config = PipelineConfig::builder()
            .dpi(9999)
            .concurrency(0)
            .script_temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(config.dpi, 400);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.script_temperature, 2.0);
    }

    #[test]
    fn build_rejects_tiny_upload_cap() {
        let err = PipelineConfig::builder().max_pdf_bytes(10).build();
        assert!(err.is_err());
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Single(2).to_indices(3), vec![1]);
        assert_eq!(PageSelection::Single(9).to_indices(3), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 5).to_indices(4), vec![1, 2, 3]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3, 8]).to_indices(4),
            vec![0, 2]
        );
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("VISION".parse::<AnalysisMode>().unwrap(), AnalysisMode::Vision);
        assert_eq!("legacy".parse::<AnalysisMode>().unwrap(), AnalysisMode::Legacy);
        assert!("fast".parse::<AnalysisMode>().is_err());
    }
}
