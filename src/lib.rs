//! # deckscan
//!
//! Strategic, resource-bounded visual extraction for pitch decks using
//! Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! The numbers that matter in a pitch deck (revenue curves, burn, cohort
//! charts, market sizing, competitor matrices) are usually drawn, not typed.
//! A text layer misses them, and sending all 40 slides to a vision model is
//! slow and expensive. deckscan reads the text layer to find the few slides
//! worth looking at, sends at most seven of them to a VLM under hard time and
//! connection limits, and keeps the results in a per-session cache that
//! answers follow-up questions instantly.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Select   score every page's text against five category keyword
//!  │              families, keep ≤ 7 (one per category first)
//!  ├─ 2. Extract  render → PNG → VLM, one page at a time (two at most),
//!  │              5 s per page, failed pages skipped
//!  ├─ 3. Cache    per-session entries + category index, compacted under
//!  │              a size ceiling, 24 h TTL
//!  └─ 4. Ask      question → category → cached pages; on a miss, extract
//!                 1–3 more pages and retry
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deckscan::{AnalysisConfig, DeckAnalyzer, DocumentHandle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = AnalysisConfig::default();
//!     let analyzer = DeckAnalyzer::new(config.clone())?;
//!     let deck = DocumentHandle::open("deck.pdf", &config).await?;
//!
//!     let outcome = analyzer.analyze("session-1", &deck).await;
//!     eprintln!("{}", outcome.report.coverage());
//!
//!     let answer = analyzer.ask("session-1", &deck, "What is the burn rate?").await;
//!     if let Some(content) = answer.matched.content {
//!         println!("{content}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without a model
//!
//! [`testing::MockVisionBackend`] and [`testing::InMemoryDeck`] replace the
//! VLM and the PDF. Inject the backend with
//! [`AnalysisConfigBuilder::vision_backend`]; nothing else changes.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deckscan` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyzer;
pub mod cache;
pub mod category;
pub mod config;
pub mod document;
pub mod error;
pub mod extractor;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod selector;
pub mod testing;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyzer::{AnalysisOutcome, Answer, DeckAnalyzer};
pub use cache::{CacheRegistry, CacheStats, ExtractionCache, QueryMatch, QueryReason};
pub use category::Category;
pub use config::{AnalysisConfig, AnalysisConfigBuilder, MAX_CONCURRENCY, MAX_PAGES, MAX_PAGES_PER_MISS};
pub use document::{DocumentHandle, PageImage, PageSource};
pub use error::{DeckScanError, PageError, VisionError};
pub use extractor::BoundedExtractor;
pub use output::{ExtractionReport, ExtractionResult, ExtractionStatus, PageRequest};
pub use pipeline::vision::{VisionBackend, VisionPrompt, VisionResponse};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use selector::{select_strategic_pages, StrategicSelection};
