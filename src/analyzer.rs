//! End-to-end deck analysis: select, extract, cache, and answer follow-ups.
//!
//! [`DeckAnalyzer`] owns the pieces that must outlive a single call: the
//! resolved vision backend (inside its [`BoundedExtractor`], which also owns
//! the connection slots) and the [`CacheRegistry`] of session caches.
//!
//! ```text
//! analyze:  select (≤7) ──▶ extract ──▶ populate cache
//! ask:      query ──hit──▶ answer
//!             └─miss──▶ rank 1–3 uncached pages ──▶ extract ──▶ extend cache ──▶ query
//! ```

use crate::cache::{CacheRegistry, QueryMatch, QueryReason};
use crate::category::classify_question;
use crate::config::{AnalysisConfig, MAX_PAGES_PER_MISS};
use crate::document::DocumentHandle;
use crate::error::DeckScanError;
use crate::extractor::BoundedExtractor;
use crate::output::{ExtractionReport, PageRequest};
use crate::pipeline::vision::{resolve_backend, VisionBackend};
use crate::selector::{rank_pages_for, select_strategic_pages, StrategicSelection};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Output of the initial strategic pass.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub session_id: String,
    pub selection: StrategicSelection,
    pub report: ExtractionReport,
}

/// Answer to a follow-up question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub matched: QueryMatch,
    /// Pages extracted on demand to answer this question.
    pub extended_pages: Vec<usize>,
    /// Report of the on-demand pass, when one ran.
    pub extension: Option<ExtractionReport>,
}

impl Answer {
    fn from_cache(matched: QueryMatch) -> Self {
        Self {
            matched,
            extended_pages: Vec::new(),
            extension: None,
        }
    }
}

pub struct DeckAnalyzer {
    config: AnalysisConfig,
    extractor: BoundedExtractor,
    registry: CacheRegistry,
}

impl DeckAnalyzer {
    /// Resolve the vision backend from `config` and build the analyzer.
    pub fn new(config: AnalysisConfig) -> Result<Self, DeckScanError> {
        let backend = resolve_backend(&config)?;
        Ok(Self::with_backend(backend, config))
    }

    pub fn with_backend(backend: Arc<dyn VisionBackend>, config: AnalysisConfig) -> Self {
        Self {
            extractor: BoundedExtractor::new(backend, &config),
            registry: CacheRegistry::from_config(&config),
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn extractor(&self) -> &BoundedExtractor {
        &self.extractor
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    /// Run the initial strategic pass for a session and cache its results.
    pub async fn analyze(&self, session_id: &str, document: &DocumentHandle) -> AnalysisOutcome {
        self.analyze_with_cancel(session_id, document, CancellationToken::new())
            .await
    }

    pub async fn analyze_with_cancel(
        &self,
        session_id: &str,
        document: &DocumentHandle,
        cancel: CancellationToken,
    ) -> AnalysisOutcome {
        let doc = document.clone();
        let max_pages = self.config.max_pages;
        let selection = tokio::task::spawn_blocking(move || select_strategic_pages(&doc, max_pages))
            .await
            .unwrap_or_else(|e| {
                error!("Page selection task failed: {}", e);
                StrategicSelection::default()
            });

        let report = self
            .extractor
            .extract_pages_with_cancel(document, &selection.page_requests(), cancel)
            .await;
        let stats = self
            .registry
            .populate_cache(session_id, &selection, &report.results)
            .await;
        info!(
            "Session '{}': {} (cache ~{} bytes)",
            session_id,
            report.coverage(),
            stats.size_estimate
        );

        AnalysisOutcome {
            session_id: session_id.to_string(),
            selection,
            report,
        }
    }

    /// Answer a follow-up question, extracting up to three more pages when
    /// the cache cannot answer it.
    ///
    /// A session that was never analyzed (or has expired) is reported as
    /// [`QueryReason::NoSession`] without touching the document.
    pub async fn ask(&self, session_id: &str, document: &DocumentHandle, question: &str) -> Answer {
        let first = self.registry.query_cache(session_id, question).await;
        if matches!(first.reason, QueryReason::Matched | QueryReason::NoSession) {
            return Answer::from_cache(first);
        }

        let requests = self.pages_for_miss(session_id, document, question).await;
        if requests.is_empty() {
            info!("Session '{}': no uncached page can answer the question", session_id);
            return Answer::from_cache(first);
        }
        info!(
            "Session '{}': cache miss, extracting pages {:?}",
            session_id,
            requests.iter().map(|r| r.page_number).collect::<Vec<_>>()
        );

        let report = self.extractor.extract_pages(document, &requests).await;
        if report.success {
            self.registry
                .populate_cache(session_id, &StrategicSelection::default(), &report.results)
                .await;
        }

        let mut matched = self.registry.query_cache(session_id, question).await;
        if !matched.cache_hit {
            matched.suggested_pages = requests
                .iter()
                .map(|r| r.page_number)
                .filter(|p| !report.results.contains_key(p))
                .collect();
        }
        Answer {
            matched,
            extended_pages: report.processed_pages(),
            extension: Some(report),
        }
    }

    async fn pages_for_miss(
        &self,
        session_id: &str,
        document: &DocumentHandle,
        question: &str,
    ) -> Vec<PageRequest> {
        let categories = classify_question(question);
        let exclude = self.registry.cached_pages(session_id).await;
        let limit = self.config.max_pages_per_miss.clamp(1, MAX_PAGES_PER_MISS);
        let doc = document.clone();
        tokio::task::spawn_blocking(move || rank_pages_for(&doc, &categories, &exclude, limit))
            .await
            .unwrap_or_else(|e| {
                error!("Page ranking task failed: {}", e);
                Vec::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::testing::{InMemoryDeck, MockVisionBackend};
    use std::time::Duration;

    fn deck() -> DocumentHandle {
        let deck = InMemoryDeck::with_pages(
            12,
            &[
                (2, "Revenue and burn rate, runway of 18 months"),
                (5, "Founding team: CEO and CTO"),
                (9, "Competitor landscape versus incumbents"),
            ],
        );
        DocumentHandle::new("deck.pdf", Arc::new(deck)).unwrap()
    }

    fn analyzer(mock: Arc<MockVisionBackend>, max_pages: usize) -> DeckAnalyzer {
        let config = AnalysisConfig::builder()
            .max_pages(max_pages)
            .per_page_timeout(Duration::from_secs(1))
            .vision_backend(mock)
            .build()
            .unwrap();
        DeckAnalyzer::new(config).unwrap()
    }

    #[tokio::test]
    async fn analyze_selects_extracts_and_caches() {
        let mock = Arc::new(MockVisionBackend::new());
        let analyzer = analyzer(mock.clone(), 7);

        let outcome = analyzer.analyze("s1", &deck()).await;

        assert_eq!(outcome.selection.pages_to_process, vec![2, 9, 5]);
        assert_eq!(outcome.report.processed_pages(), vec![2, 5, 9]);
        assert_eq!(mock.calls(), vec![2, 9, 5]);
        let answer = analyzer.ask("s1", &deck(), "What is the burn?").await;
        assert!(answer.matched.cache_hit);
        assert_eq!(answer.matched.relevant_pages, vec![2]);
        assert!(answer.extension.is_none());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn miss_extends_cache_with_uncached_pages() {
        let mock = Arc::new(MockVisionBackend::new());
        let analyzer = analyzer(mock.clone(), 1);
        let doc = deck();

        let outcome = analyzer.analyze("s1", &doc).await;
        assert_eq!(outcome.selection.pages_to_process, vec![2]);

        let answer = analyzer.ask("s1", &doc, "Who are the founders?").await;

        assert!(answer.matched.cache_hit);
        assert_eq!(answer.extended_pages, vec![5]);
        assert_eq!(answer.matched.relevant_pages, vec![5]);
        assert_eq!(answer.matched.matched_categories, vec![Category::Team]);
        assert_eq!(mock.calls(), vec![2, 5]);
    }

    #[tokio::test]
    async fn unknown_session_does_not_extract() {
        let mock = Arc::new(MockVisionBackend::new());
        let analyzer = analyzer(mock.clone(), 7);

        let answer = analyzer.ask("ghost", &deck(), "revenue?").await;

        assert_eq!(answer.matched.reason, QueryReason::NoSession);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn failed_extension_suggests_pages_to_retry() {
        let mock = Arc::new(
            MockVisionBackend::new()
                .with_failure(5, crate::error::VisionError::Transient("503".into())),
        );
        let analyzer = analyzer(mock, 1);
        let doc = deck();
        analyzer.analyze("s1", &doc).await;

        let answer = analyzer.ask("s1", &doc, "Who is on the team?").await;

        assert!(!answer.matched.cache_hit);
        assert_eq!(answer.matched.reason, QueryReason::NoMatch);
        assert_eq!(answer.matched.suggested_pages, vec![5]);
        assert!(answer.extended_pages.is_empty());
    }
}
