//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as the extractor works through a pass.
//!
//! # Example
//!
//! ```rust
//! use deckscan::{AnalysisConfig, ExtractionProgressCallback, PageError};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct SkipCounter {
//!     skipped: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for SkipCounter {
//!     fn on_page_skipped(&self, _page: usize, _total: usize, error: &PageError) {
//!         self.skipped.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("skipped: {error}");
//!     }
//! }
//!
//! let cb = Arc::new(SkipCounter { skipped: AtomicUsize::new(0) });
//! let config = AnalysisConfig::builder()
//!     .progress_callback(cb as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::PageError;
use std::sync::Arc;

/// Called by the extractor as it processes each page of a pass.
///
/// All methods have default no-op implementations. With `concurrency = 2`
/// two pages may report at the same time, so implementations must be
/// `Send + Sync` and guard shared state.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once per pass, after the page cap has been applied.
    ///
    /// # Arguments
    /// * `total_pages` — pages that will be attempted in this pass
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is rendered and sent to the backend.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page produced an extraction result.
    ///
    /// # Arguments
    /// * `content_len` — byte length of the extracted content
    fn on_page_complete(&self, page_num: usize, total_pages: usize, content_len: usize) {
        let _ = (page_num, total_pages, content_len);
    }

    /// Called when a page was abandoned or never started.
    fn on_page_skipped(&self, page_num: usize, total_pages: usize, error: &PageError) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page of the pass has been accounted for.
    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        skips: AtomicUsize,
        success_total: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_skipped(&self, _page_num: usize, _total_pages: usize, _error: &PageError) {
            self.skips.fetch_add(1, Ordering::SeqCst);
        }

        fn on_extraction_complete(&self, _total_pages: usize, success_count: usize) {
            self.success_total.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(7);
        cb.on_page_start(18, 7);
        cb.on_page_complete(18, 7, 42);
        cb.on_page_skipped(19, 7, &PageError::Cancelled { page: 19 });
        cb.on_extraction_complete(7, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_page_start(3, 2);
        tracker.on_page_complete(3, 2, 100);
        tracker.on_page_start(8, 2);
        tracker.on_page_skipped(
            8,
            2,
            &PageError::Timeout {
                page: 8,
                elapsed_ms: 5000,
            },
        );
        tracker.on_extraction_complete(2, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skips.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.success_total.load(Ordering::SeqCst), 1);
    }
}
