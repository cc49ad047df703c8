//! Integration tests for the select → extract → cache → ask pipeline.
//!
//! Everything runs against `deckscan::testing` doubles: an in-memory deck
//! with realistic slide text and a scripted vision backend. No pdfium, no
//! network.

use deckscan::category::Category;
use deckscan::testing::{InMemoryDeck, MockVisionBackend};
use deckscan::{
    select_strategic_pages, AnalysisConfig, BoundedExtractor, CacheRegistry, DeckAnalyzer,
    DocumentHandle, ExtractionProgressCallback, ExtractionStatus, PageError, PageRequest,
    QueryReason, MAX_PAGES,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── Test helpers ─────────────────────────────────────────────────────────────

const TEAM: &str = "Our team: founder and CEO Jane Doe, CTO John Roe, advisory board";
const TRACTION: &str = "Traction: 40% MoM growth, 12k users, net retention 130%";
const COHORTS: &str = "Customer cohorts and churn over 18 months";
const COMPETITION: &str = "Competitive landscape: us versus incumbents and alternatives";
const FINANCIALS: &str =
    "Financials: revenue $2.4M ARR, burn rate $180K per month, runway 14 months";
const UNIT_ECONOMICS: &str = "Unit economics: CAC $120, LTV $900, gross margin 72%";
const MARKET: &str = "Market size: TAM $40B, SAM $8B, SOM $1B";

/// The 43-slide deck: keyword hits only on {3, 8, 9, 11, 18, 19, 20}.
fn scenario_deck() -> Arc<InMemoryDeck> {
    Arc::new(InMemoryDeck::with_pages(
        43,
        &[
            (3, TEAM),
            (8, TRACTION),
            (9, COHORTS),
            (11, COMPETITION),
            (18, FINANCIALS),
            (19, UNIT_ECONOMICS),
            (20, MARKET),
        ],
    ))
}

fn handle(deck: Arc<InMemoryDeck>) -> DocumentHandle {
    DocumentHandle::new("scenario-deck.pdf", deck).expect("in-memory deck opens")
}

fn config(mock: Arc<MockVisionBackend>, timeout_ms: u64) -> AnalysisConfig {
    AnalysisConfig::builder()
        .per_page_timeout(Duration::from_millis(timeout_ms))
        .vision_backend(mock)
        .build()
        .expect("valid config")
}

fn requests(pages: &[usize]) -> Vec<PageRequest> {
    pages.iter().map(|&p| PageRequest::new(p, Category::Financials)).collect()
}

#[derive(Default)]
struct CountingProgress {
    started: AtomicUsize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    finished_with: AtomicUsize,
}

impl ExtractionProgressCallback for CountingProgress {
    fn on_page_start(&self, _page: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page: usize, _total: usize, _len: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_skipped(&self, _page: usize, _total: usize, _error: &PageError) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }
    fn on_extraction_complete(&self, _total: usize, success_count: usize) {
        self.finished_with.store(success_count, Ordering::SeqCst);
    }
}

// ── Scenario ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scenario_43_page_deck() {
    let deck = handle(scenario_deck());

    let selection = select_strategic_pages(&deck, 7);
    let selected: BTreeSet<usize> = selection.pages_to_process.iter().copied().collect();
    assert_eq!(selected, BTreeSet::from([3, 8, 9, 11, 18, 19, 20]));
    assert_eq!(selection.by_category[&Category::Financials], vec![18, 19]);
    assert_eq!(selection.by_category[&Category::Traction], vec![8, 9]);
    assert_eq!(selection.by_category[&Category::Market], vec![20]);
    assert_eq!(selection.by_category[&Category::Competition], vec![11]);
    assert_eq!(selection.by_category[&Category::Team], vec![3]);

    let mock = Arc::new(
        MockVisionBackend::new()
            .with_hang(3)
            .with_hang(9)
            .with_hang(20),
    );
    let analyzer = DeckAnalyzer::new(config(mock.clone(), 50)).unwrap();
    let outcome = analyzer.analyze("investor-1", &deck).await;

    assert!(outcome.report.success);
    assert_eq!(outcome.report.processed_pages(), vec![8, 11, 18, 19]);
    assert_eq!(outcome.report.status, ExtractionStatus::Partial);
    assert_eq!(outcome.report.coverage(), "4 of 7 strategic pages processed");
    assert!(mock.call_count() <= MAX_PAGES);

    let m = analyzer
        .registry()
        .query_cache("investor-1", "Who are the main competitors?")
        .await;
    assert!(m.cache_hit);
    assert_eq!(m.relevant_pages, vec![11]);
    assert_eq!(m.matched_categories, vec![Category::Competition]);
}

// ── Selector ─────────────────────────────────────────────────────────────────

#[test]
fn test_selection_capped_on_large_deck() {
    let texts = (1..=200)
        .map(|p| Some(format!("Slide {p}: revenue growth TAM competitor founder")))
        .collect();
    let deck = handle(Arc::new(InMemoryDeck::from_texts(texts)));

    let selection = select_strategic_pages(&deck, 50);

    assert_eq!(selection.len(), MAX_PAGES);
}

#[test]
fn test_unreadable_pages_shrink_selection_without_failing() {
    let deck = handle(Arc::new(InMemoryDeck::from_texts(vec![
        None,
        Some(FINANCIALS.into()),
        None,
    ])));

    let selection = select_strategic_pages(&deck, 7);

    assert_eq!(selection.pages_to_process, vec![2]);
    assert_eq!(selection.skipped_pages, vec![1, 3]);
}

// ── Extractor ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_of_seven_timeouts_keep_five_entries() {
    let deck = handle(Arc::new(InMemoryDeck::blank(10)));
    let mock = Arc::new(MockVisionBackend::new().with_hang(4).with_hang(7));
    let extractor = BoundedExtractor::new(mock.clone(), &config(mock, 40));

    let report = extractor
        .extract_pages(&deck, &requests(&[1, 2, 3, 4, 5, 6, 7]))
        .await;

    assert_eq!(report.results.len(), 5);
    assert!(report.success);
    assert!(!report.results.contains_key(&4));
    assert!(!report.results.contains_key(&7));
}

#[tokio::test]
async fn test_all_timeouts_is_total_failure() {
    let deck = handle(Arc::new(InMemoryDeck::blank(7)));
    let mut mock = MockVisionBackend::new();
    for page in 1..=7 {
        mock = mock.with_hang(page);
    }
    let mock = Arc::new(mock);
    let extractor = BoundedExtractor::new(mock.clone(), &config(mock.clone(), 20));

    let report = extractor
        .extract_pages(&deck, &requests(&[1, 2, 3, 4, 5, 6, 7]))
        .await;

    assert!(report.results.is_empty());
    assert!(!report.success);
    assert_eq!(report.status, ExtractionStatus::TotalFailure);
    assert_eq!(report.failures.len(), 7);
}

#[tokio::test]
async fn test_backend_never_sees_more_than_seven_pages() {
    let deck = handle(Arc::new(InMemoryDeck::blank(43)));
    let mock = Arc::new(MockVisionBackend::new());
    let extractor = BoundedExtractor::new(mock.clone(), &config(mock.clone(), 1000));

    let all: Vec<usize> = (1..=43).collect();
    let report = extractor.extract_pages(&deck, &requests(&all)).await;

    assert_eq!(mock.call_count(), 7);
    assert_eq!(report.dropped_over_cap.len(), 36);
}

#[tokio::test]
async fn test_progress_callbacks_account_for_every_page() {
    let deck = handle(Arc::new(InMemoryDeck::blank(5)));
    let mock = Arc::new(MockVisionBackend::new().with_hang(2));
    let progress = Arc::new(CountingProgress::default());
    let config = AnalysisConfig::builder()
        .per_page_timeout(Duration::from_millis(40))
        .vision_backend(mock.clone())
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    let extractor = BoundedExtractor::new(mock, &config);

    extractor.extract_pages(&deck, &requests(&[1, 2, 3])).await;

    assert_eq!(progress.started.load(Ordering::SeqCst), 3);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 2);
    assert_eq!(progress.skipped.load(Ordering::SeqCst), 1);
    assert_eq!(progress.finished_with.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_page_images_removed_after_analysis() {
    let deck = scenario_deck();
    let doc = handle(deck.clone());
    let mock = Arc::new(MockVisionBackend::new().with_hang(11));
    let analyzer = DeckAnalyzer::new(config(mock, 40)).unwrap();

    analyzer.analyze("s", &doc).await;

    let rendered = deck.rendered_paths();
    assert_eq!(rendered.len(), 7);
    assert!(rendered.iter().all(|p| !p.exists()));
}

#[tokio::test]
async fn test_cancelled_analysis_keeps_partial_results() {
    let doc = handle(scenario_deck());
    let mock = Arc::new(MockVisionBackend::new().with_default_delay(Duration::from_millis(40)));
    let analyzer = DeckAnalyzer::new(config(mock.clone(), 1000)).unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.cancel();
    });
    let outcome = analyzer.analyze_with_cancel("s", &doc, cancel).await;

    assert_eq!(outcome.report.status, ExtractionStatus::Cancelled);
    assert!(mock.call_count() < 7);
    assert_eq!(outcome.report.results.len(), mock.call_count());
}

#[tokio::test]
async fn test_connection_ceiling_shared_between_sessions() {
    let doc = handle(scenario_deck());
    let mock = Arc::new(MockVisionBackend::new().with_default_delay(Duration::from_millis(15)));
    let analyzer = DeckAnalyzer::new(config(mock.clone(), 1000)).unwrap();

    let (a, b) = tokio::join!(analyzer.analyze("a", &doc), analyzer.analyze("b", &doc));

    assert_eq!(a.report.results.len(), 7);
    assert_eq!(b.report.results.len(), 7);
    assert_eq!(mock.peak_in_flight(), 1);
}

// ── Cache & query router ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_burn_rate_hits_financial_pages() {
    let doc = handle(scenario_deck());
    let mock = Arc::new(MockVisionBackend::new());
    let analyzer = DeckAnalyzer::new(config(mock, 1000)).unwrap();
    analyzer.analyze("s", &doc).await;

    let m = analyzer.registry().query_cache("s", "what is the burn rate?").await;

    assert!(m.cache_hit);
    let pages: BTreeSet<usize> = m.relevant_pages.iter().copied().collect();
    assert_eq!(pages, BTreeSet::from([18, 19]));
}

#[tokio::test]
async fn test_missing_category_routes_to_no_match() {
    let doc = handle(scenario_deck());
    let mock = Arc::new(MockVisionBackend::new().with_hang(3));
    let analyzer = DeckAnalyzer::new(config(mock, 40)).unwrap();
    analyzer.analyze("s", &doc).await;

    let m = analyzer.registry().query_cache("s", "Tell me about the founders").await;

    assert!(!m.cache_hit);
    assert_eq!(m.reason, QueryReason::NoMatch);
}

#[tokio::test]
async fn test_uncached_category_misses_despite_keyword_overlap() {
    let doc = handle(scenario_deck());
    let mock = Arc::new(
        MockVisionBackend::new()
            .with_hang(3)
            .with_response(18, "Revenue $2.4M ARR; the founders still own 60% of equity.", 0.9)
            .with_response(19, "CAC $120 against LTV $900; market share is growing.", 0.8),
    );
    let analyzer = DeckAnalyzer::new(config(mock, 40)).unwrap();
    analyzer.analyze("s", &doc).await;

    let founders = analyzer.registry().query_cache("s", "Tell me about the founders").await;
    assert!(!founders.cache_hit);
    assert_eq!(founders.reason, QueryReason::NoMatch);

    let market = analyzer.registry().query_cache("s", "What is the market size?").await;
    assert!(market.cache_hit);
    assert_eq!(market.relevant_pages, vec![20]);
    assert_eq!(market.matched_categories, vec![Category::Market]);
}

#[tokio::test]
async fn test_registry_without_session() {
    let registry = CacheRegistry::from_config(&AnalysisConfig::default());
    let m = registry.query_cache("unknown", "revenue?").await;
    assert_eq!(m.reason, QueryReason::NoSession);
}

#[tokio::test]
async fn test_empty_pass_gives_empty_cache() {
    let doc = handle(Arc::new(InMemoryDeck::blank(12)));
    let mock = Arc::new(MockVisionBackend::new());
    let analyzer = DeckAnalyzer::new(config(mock.clone(), 1000)).unwrap();

    let outcome = analyzer.analyze("s", &doc).await;

    assert_eq!(outcome.report.status, ExtractionStatus::NoPages);
    assert_eq!(mock.call_count(), 0);
    let m = analyzer.registry().query_cache("s", "revenue?").await;
    assert_eq!(m.reason, QueryReason::EmptyCache);
}

// ── On-demand extension ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_miss_extends_cache_and_then_hits() {
    let doc = handle(scenario_deck());
    let mock = Arc::new(MockVisionBackend::new());
    let config = AnalysisConfig::builder()
        .max_pages(2)
        .per_page_timeout(Duration::from_secs(1))
        .vision_backend(mock.clone())
        .build()
        .unwrap();
    let analyzer = DeckAnalyzer::new(config).unwrap();

    let outcome = analyzer.analyze("s", &doc).await;
    assert_eq!(outcome.selection.pages_to_process, vec![18, 8]);

    let answer = analyzer.ask("s", &doc, "Who are the competitors?").await;

    assert!(answer.matched.cache_hit);
    assert_eq!(answer.extended_pages, vec![11]);
    assert_eq!(answer.matched.relevant_pages, vec![11]);
    assert_eq!(mock.call_count(), 3);

    let again = analyzer.ask("s", &doc, "Who are the competitors?").await;
    assert!(again.extension.is_none());
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn test_extension_bounded_by_pages_per_miss() {
    let doc = handle(scenario_deck());
    let mock = Arc::new(MockVisionBackend::new());
    let config = AnalysisConfig::builder()
        .max_pages(1)
        .max_pages_per_miss(1)
        .per_page_timeout(Duration::from_secs(1))
        .vision_backend(mock.clone())
        .build()
        .unwrap();
    let analyzer = DeckAnalyzer::new(config).unwrap();
    analyzer.analyze("s", &doc).await;

    let answer = analyzer
        .ask("s", &doc, "How big is the market and who are the competitors?")
        .await;

    assert_eq!(answer.extended_pages.len(), 1);
    assert_eq!(mock.call_count(), 2);
}
