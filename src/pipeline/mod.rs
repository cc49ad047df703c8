//! Per-page pipeline stages used by the bounded extractor.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the rendering or inference backend can be
//! swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ vision ──▶ parse
//! (pdfium)   (base64)   (VLM)      (JSON / prose → result)
//! ```
//!
//! 1. [`render`] — page count, text layer and rasterisation through pdfium;
//!    blocking, so callers go through `spawn_blocking`
//! 2. [`encode`] — base64-wrap the page PNG for the multimodal request body
//! 3. [`vision`] — the [`vision::VisionBackend`] seam and its edgequake-llm
//!    implementation; the only stage with network I/O
//! 4. [`parse`]  — tolerant parsing of the model reply into content,
//!    confidence and key phrases

pub mod encode;
pub mod parse;
pub mod render;
pub mod vision;
