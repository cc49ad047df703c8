//! Result types produced by an extraction pass.

use crate::category::Category;
use crate::error::PageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One page the extractor is asked to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-indexed page number.
    pub page_number: usize,
    /// Category whose prompt the page is read with.
    pub category: Category,
}

impl PageRequest {
    pub fn new(page_number: usize, category: Category) -> Self {
        Self {
            page_number,
            category,
        }
    }
}

impl From<usize> for PageRequest {
    fn from(page_number: usize) -> Self {
        Self::new(page_number, Category::Other)
    }
}

/// Structured content extracted from one page.
///
/// Exists only for pages that succeeded; a page that timed out or errored
/// has no `ExtractionResult` at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub page_number: usize,
    pub category: Category,
    pub content: String,
    /// Clamped into `[0, 1]`.
    pub confidence: f32,
    pub extracted_at: DateTime<Utc>,
    pub key_phrases: BTreeSet<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

/// Overall outcome of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Every attempted page produced a result.
    Complete,
    /// Some pages produced results, others were skipped.
    Partial,
    /// Pages were requested and none produced a result.
    TotalFailure,
    /// Nothing was requested (empty selection).
    NoPages,
    /// Cancelled before finishing; the results collected so far are kept.
    Cancelled,
}

/// The `{results, success}` pair returned by an extraction pass, with
/// accounting for what was dropped and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub results: BTreeMap<usize, ExtractionResult>,
    /// `true` when at least one page produced a result.
    pub success: bool,
    pub status: ExtractionStatus,
    /// Distinct pages asked for, before the cap.
    pub requested: usize,
    /// Pages remaining after the cap.
    pub planned: usize,
    /// Pages actually started (rendered and/or sent to the backend).
    pub attempted: usize,
    /// Pages dropped by the page cap and never processed.
    pub dropped_over_cap: Vec<usize>,
    pub failures: Vec<PageError>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub duration_ms: u64,
}

impl ExtractionReport {
    /// Report for a pass that had nothing to do.
    pub fn empty() -> Self {
        Self {
            results: BTreeMap::new(),
            success: false,
            status: ExtractionStatus::NoPages,
            requested: 0,
            planned: 0,
            attempted: 0,
            dropped_over_cap: Vec::new(),
            failures: Vec::new(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            duration_ms: 0,
        }
    }

    /// Pages that produced a result, ascending.
    pub fn processed_pages(&self) -> Vec<usize> {
        self.results.keys().copied().collect()
    }

    /// Whether downstream consumers should fall back to text-only analysis.
    pub fn needs_text_fallback(&self) -> bool {
        !self.success
    }

    /// One-line coverage indicator for downstream consumers.
    pub fn coverage(&self) -> String {
        match self.status {
            ExtractionStatus::NoPages => {
                "no high-value pages selected for visual extraction; expect text-only quality"
                    .to_string()
            }
            ExtractionStatus::TotalFailure => format!(
                "visual extraction failed for all {} pages; expect text-only quality",
                self.planned
            ),
            ExtractionStatus::Cancelled => format!(
                "extraction cancelled: {} of {} strategic pages processed",
                self.results.len(),
                self.planned
            ),
            ExtractionStatus::Complete | ExtractionStatus::Partial => format!(
                "{} of {} strategic pages processed",
                self.results.len(),
                self.planned
            ),
        }
    }
}
