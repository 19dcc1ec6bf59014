//! Pipeline stages that turn an uploaded PDF into a narrated lecture.
//!
//! Each submodule implements one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap
//! implementations (e.g. a different rendering backend) without touching
//! the others.
//!
//! ## Data Flow
//!
//! ```text
//! ingest ──▶ render ──▶ analyze ──▶ script ──▶ audio
//! (upload)   (pdfium)   (VLM, or    (agent     (TTS +
//!                        extract+    voice)     timings)
//!                        captions)
//! ```
//!
//! 1. [`ingest`]  — validate the upload (or fetch a URL) and create the job
//! 2. [`render`]  — rasterise selected pages; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]  — PNG-encode and base64-wrap page images for multimodal
//!    API request bodies
//! 4. [`analyze`] — per-page vision calls producing topic segments, parsed
//!    by [`parse`] and ordered by [`order`]
//! 5. [`extract`] — the legacy alternative to vision analysis: embedded
//!    text plus detected figures/tables, captioned element by element
//! 6. [`script`]  — narration generation in the lecture agent's voice
//! 7. [`audio`]   — speech synthesis, track assembly and word timings
//!    (the synthesizers themselves live in [`crate::tts`])

pub mod analyze;
pub mod audio;
pub mod encode;
pub mod extract;
pub mod ingest;
pub mod order;
pub mod parse;
pub mod render;
pub mod script;
