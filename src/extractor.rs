//! Bounded vision extraction over a small set of pages.
//!
//! ## Hard limits
//!
//! | Limit | Value | Enforced by |
//! |---|---|---|
//! | pages per pass | ≤ 7 | truncation before any work starts |
//! | per-page deadline | configured, default 5 s | `tokio::time::timeout_at` around render + inference, started once a slot is held |
//! | total pass budget | pages × per-page deadline | time the pass holds slots; a page that cannot get a slot within what is left is skipped |
//! | connection slots | ≤ 2 | a [`Semaphore`] shared by every pass of one extractor |
//!
//! Time spent queued behind another pass is not charged to a page's
//! deadline, only bounded by the waiting pass's remaining budget.
//!
//! Rendering runs on the blocking pool and cannot be interrupted. A render
//! that outlives its page deadline keeps the page's slot until it returns,
//! so timed-out renders never pile up beyond the slot count.
//!
//! A page that misses its deadline or errors is dropped from the result map
//! and recorded in [`ExtractionReport::failures`]. It is never retried within
//! the pass. The only pass-level failure is "no page succeeded", reported as
//! [`ExtractionStatus::TotalFailure`] with `success = false`.
//!
//! Pages are processed in request order. With one slot the order is
//! strictly sequential; with two, the next page starts as soon as a slot
//! frees up.

use crate::config::{AnalysisConfig, MAX_CONCURRENCY, MAX_PAGES};
use crate::document::DocumentHandle;
use crate::error::PageError;
use crate::output::{ExtractionReport, ExtractionResult, ExtractionStatus, PageRequest};
use crate::pipeline::parse::parse_page_response;
use crate::pipeline::vision::VisionBackend;
use crate::progress::ProgressCallback;
use crate::prompts::page_prompt;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resource limits applied to every pass, already clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    pub max_pages: usize,
    pub per_page_timeout: Duration,
    pub concurrency: usize,
}

impl ExtractionLimits {
    fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_pages: config.max_pages.min(MAX_PAGES),
            per_page_timeout: config.per_page_timeout,
            concurrency: config.concurrency.clamp(1, MAX_CONCURRENCY),
        }
    }

    /// Wall-clock budget for a pass of `pages` pages.
    pub fn budget_for(&self, pages: usize) -> Duration {
        self.per_page_timeout * pages as u32
    }
}

/// Slot-holding time of one pass, charged against its budget.
struct PassBudget {
    total: Duration,
    charged_us: AtomicU64,
}

impl PassBudget {
    fn new(total: Duration) -> Self {
        Self {
            total,
            charged_us: AtomicU64::new(0),
        }
    }

    fn remaining(&self) -> Duration {
        self.total
            .saturating_sub(Duration::from_micros(self.charged_us.load(Ordering::SeqCst)))
    }

    fn charge(&self, spent: Duration) {
        self.charged_us
            .fetch_add(spent.as_micros() as u64, Ordering::SeqCst);
    }

    fn exhausted(&self, page: usize) -> PageError {
        PageError::BudgetExhausted {
            page,
            budget_ms: self.total.as_millis() as u64,
        }
    }
}

/// Runs capped, deadline-bounded vision passes against one backend.
pub struct BoundedExtractor {
    backend: Arc<dyn VisionBackend>,
    slots: Arc<Semaphore>,
    limits: ExtractionLimits,
    system_prompt: Option<String>,
    progress: Option<ProgressCallback>,
}

impl BoundedExtractor {
    pub fn new(backend: Arc<dyn VisionBackend>, config: &AnalysisConfig) -> Self {
        let limits = ExtractionLimits::from_config(config);
        Self {
            backend,
            slots: Arc::new(Semaphore::new(limits.concurrency)),
            limits,
            system_prompt: config.system_prompt.clone(),
            progress: config.progress_callback.clone(),
        }
    }

    pub fn limits(&self) -> ExtractionLimits {
        self.limits
    }

    /// Extract the requested pages. Never fails; see [`ExtractionReport`].
    pub async fn extract_pages(
        &self,
        document: &DocumentHandle,
        pages: &[PageRequest],
    ) -> ExtractionReport {
        self.extract_pages_with_cancel(document, pages, CancellationToken::new())
            .await
    }

    /// As [`Self::extract_pages`], stopping early once `cancel` fires.
    ///
    /// Cancellation stops new pages from starting. A page already in flight
    /// runs to completion or to its own deadline, and its result is kept.
    pub async fn extract_pages_with_cancel(
        &self,
        document: &DocumentHandle,
        pages: &[PageRequest],
        cancel: CancellationToken,
    ) -> ExtractionReport {
        let started = Instant::now();

        let mut seen = BTreeSet::new();
        let distinct: Vec<PageRequest> = pages
            .iter()
            .filter(|r| seen.insert(r.page_number))
            .copied()
            .collect();
        if distinct.is_empty() {
            debug!("Extraction requested with no pages");
            return ExtractionReport::empty();
        }

        let cap = self.limits.max_pages.min(distinct.len());
        let (planned, over_cap) = distinct.split_at(cap);
        let dropped_over_cap: Vec<usize> = over_cap.iter().map(|r| r.page_number).collect();
        if !dropped_over_cap.is_empty() {
            warn!(
                "Extraction capped at {} pages; dropping {:?}",
                self.limits.max_pages, dropped_over_cap
            );
        }

        let total = planned.len();
        let budget = PassBudget::new(self.limits.budget_for(total));
        info!(
            "Extracting {} pages from '{}' (concurrency {}, budget {}ms)",
            total,
            document.reference(),
            self.limits.concurrency,
            budget.total.as_millis()
        );
        if let Some(ref cb) = self.progress {
            cb.on_extraction_start(total);
        }

        let outcomes: Vec<Result<ExtractionResult, PageError>> =
            stream::iter(planned.iter().map(|&request| {
                let cancel = cancel.clone();
                let budget = &budget;
                async move {
                    self.run_page(document, request, total, budget, &cancel)
                        .await
                }
            }))
            .buffered(self.limits.concurrency)
            .collect()
            .await;

        let mut report = ExtractionReport::empty();
        report.requested = distinct.len();
        report.planned = total;
        report.dropped_over_cap = dropped_over_cap;

        for outcome in outcomes {
            match outcome {
                Ok(result) => {
                    report.attempted += 1;
                    report.total_input_tokens += result.input_tokens;
                    report.total_output_tokens += result.output_tokens;
                    report.results.insert(result.page_number, result);
                }
                Err(e) => {
                    if e.was_attempted() {
                        report.attempted += 1;
                    }
                    report.failures.push(e);
                }
            }
        }

        let was_cancelled = report
            .failures
            .iter()
            .any(|e| matches!(e, PageError::Cancelled { .. }));
        report.success = !report.results.is_empty();
        report.status = if total == 0 {
            ExtractionStatus::NoPages
        } else if was_cancelled {
            ExtractionStatus::Cancelled
        } else if report.results.is_empty() {
            ExtractionStatus::TotalFailure
        } else if report.failures.is_empty() {
            ExtractionStatus::Complete
        } else {
            ExtractionStatus::Partial
        };
        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.status == ExtractionStatus::TotalFailure {
            warn!(
                "Visual extraction failed for all {} pages of '{}'",
                total,
                document.reference()
            );
        }
        info!(
            "Extraction complete: {}/{} pages, {}ms",
            report.results.len(),
            total,
            report.duration_ms
        );
        if let Some(ref cb) = self.progress {
            cb.on_extraction_complete(total, report.results.len());
        }
        report
    }

    async fn run_page(
        &self,
        document: &DocumentHandle,
        request: PageRequest,
        total: usize,
        budget: &PassBudget,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, PageError> {
        let page = request.page_number;
        let outcome = self
            .guarded_page(document, request, total, budget, cancel)
            .await;

        if let Some(ref cb) = self.progress {
            match &outcome {
                Ok(result) => cb.on_page_complete(page, total, result.content.len()),
                Err(e) => cb.on_page_skipped(page, total, e),
            }
        }
        if let Err(ref e) = outcome {
            warn!("{}", e);
        }
        outcome
    }

    async fn guarded_page(
        &self,
        document: &DocumentHandle,
        request: PageRequest,
        total: usize,
        budget: &PassBudget,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, PageError> {
        let page = request.page_number;
        if cancel.is_cancelled() {
            return Err(PageError::Cancelled { page });
        }
        let remaining = budget.remaining();
        if remaining.is_zero() {
            return Err(budget.exhausted(page));
        }
        if page == 0 || page > document.page_count() {
            return Err(PageError::OutOfRange {
                page,
                total: document.page_count(),
            });
        }

        let slot = match tokio::time::timeout(remaining, Arc::clone(&self.slots).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => Arc::new(permit),
            Ok(Err(_)) => {
                return Err(PageError::InferenceFailed {
                    page,
                    detail: "connection slots closed".into(),
                })
            }
            Err(_) => {
                debug!("Page {}: no connection slot within {}ms", page, remaining.as_millis());
                return Err(budget.exhausted(page));
            }
        };
        if cancel.is_cancelled() {
            return Err(PageError::Cancelled { page });
        }

        if let Some(ref cb) = self.progress {
            cb.on_page_start(page, total);
        }
        let started = Instant::now();
        let outcome = tokio::time::timeout_at(
            started + self.limits.per_page_timeout,
            self.process_page(document, request, slot),
        )
        .await;
        budget.charge(started.elapsed());
        match outcome {
            Ok(outcome) => outcome,
            Err(_) => Err(PageError::Timeout {
                page,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Render, infer and parse one page while holding `slot`. The rendered
    /// image lives only for the duration of this future.
    async fn process_page(
        &self,
        document: &DocumentHandle,
        request: PageRequest,
        slot: Arc<OwnedSemaphorePermit>,
    ) -> Result<ExtractionResult, PageError> {
        let page = request.page_number;
        let started = Instant::now();

        let source = document.source();
        let render_slot = Arc::clone(&slot);
        let image = tokio::task::spawn_blocking(move || {
            let _slot = render_slot;
            source.render_page(page)
        })
        .await
        .map_err(|e| PageError::RenderFailed {
            page,
            detail: format!("render task panicked: {e}"),
        })?
        .map_err(|e| PageError::RenderFailed {
            page,
            detail: e.to_string(),
        })?;
        let png = image.read().await.map_err(|e| PageError::RenderFailed {
            page,
            detail: format!("reading rendered image: {e}"),
        })?;

        let prompt = page_prompt(page, request.category, self.system_prompt.as_deref());
        let response = self
            .backend
            .vision_extract(&png, &prompt)
            .await
            .map_err(|e| PageError::InferenceFailed {
                page,
                detail: e.to_string(),
            })?;
        drop(slot);
        drop(image);

        let parsed = parse_page_response(&response.content, response.confidence, request.category)
            .ok_or_else(|| PageError::InferenceFailed {
                page,
                detail: "empty response".into(),
            })?;

        debug!(
            "Page {} ({}): {} chars, confidence {:.2}",
            page,
            request.category,
            parsed.content.len(),
            parsed.confidence
        );

        Ok(ExtractionResult {
            page_number: page,
            category: request.category,
            content: parsed.content,
            confidence: parsed.confidence,
            extracted_at: Utc::now(),
            key_phrases: parsed.key_phrases,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
