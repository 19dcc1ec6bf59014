//! # pdf2lecture
//!
//! Turn PDF documents into narrated audio lectures with synchronised word
//! timings.
//!
//! ## Why this crate?
//!
//! Reading a dense PDF takes full attention; listening to a well-structured
//! lecture does not. This crate rasterises each page into a PNG, lets a
//! vision LLM read it as a human would, segments the document into ordered
//! topics, scripts a narration in the voice of a configurable lecture agent,
//! and synthesises speech with per-word timings so a player can highlight
//! the words as they are spoken.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Ingest   validate the upload (or download from URL), create a job
//!  ├─ 2. Render   rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Analyze  VLM per page → topic segments, topologically ordered
//!  │              (or: embedded-text extraction + element captioning)
//!  ├─ 4. Script   narration per segment in the lecture agent's persona
//!  └─ 5. Audio    TTS per block, one assembled track + word timings
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2lecture::{compose, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = PipelineConfig::default();
//!     let output = compose("paper.pdf", &config).await?;
//!     std::fs::write("lecture.wav", &output.audio)?;
//!     eprintln!("{}", output.stats.summary());
//!     Ok(())
//! }
//! ```
//!
//! The same pipeline runs behind an HTTP service (`--serve` on the CLI, or
//! [`server::serve`] from code): upload a PDF, poll the job, then fetch the
//! playback manifest, audio track and word-level position.
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `pdf2lecture` binary (clap + indicatif) |
//! | `server` | via cli | The axum HTTP service |
//! | `polly`  | on      | Amazon Polly speech synthesis with real word marks |
//! | `s3`     | off     | S3-compatible object store backend |
//!
//! Without `polly` (or without AWS credentials at runtime) the audio stage
//! falls back to an offline mock synthesizer that produces a silent WAV
//! track with estimated timings — useful for development and CI.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod bus;
pub mod compose;
pub mod config;
pub mod content;
pub mod error;
pub mod job;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod playback;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod store;
pub mod timing;
pub mod tts;
pub mod worker;

#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::{LectureAgent, VoiceSpec, DEFAULT_AGENT_ID};
pub use bus::{EventBus, JobEvent};
pub use compose::{compose, compose_bytes, compose_to_dir, compose_with_agent, inspect};
pub use config::{AnalysisMode, PageSelection, PipelineConfig, PipelineConfigBuilder};
pub use content::{DocumentMetadata, LectureScript, ScriptBlock, Segment, SegmentKind};
pub use error::{LectureError, StageError};
pub use job::{Job, JobStatus, StageKind, StageStatus};
pub use output::{LectureOutput, LectureStats};
pub use progress::{LectureProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::Stores;
pub use timing::{TimingTrack, WordTiming};
