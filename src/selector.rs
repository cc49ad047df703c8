//! Page-value selection: pick the few pages worth a vision call.
//!
//! Every page's text layer is scored against the category keyword families
//! in [`crate::category`]. The score is keyword-hit density, so a slide
//! titled "Unit economics" with three figures beats a dense appendix page
//! that mentions revenue once.
//!
//! ## Fill order
//!
//! 1. One page per category, in priority order (financials, traction,
//!    market, competition, team): the highest-scoring page for that category
//!    that has not already been taken.
//! 2. Remaining slots by global score (each page's best category).
//!
//! Ties go to the lower page number, so the same deck always yields the
//! same selection. Pages without a single keyword hit are never selected.
//! A deck with fewer high-value pages than slots gets a smaller selection.

use crate::category::{count_hits, tokenize, Category};
use crate::config::{MAX_PAGES, MAX_PAGES_PER_MISS};
use crate::document::DocumentHandle;
use crate::output::PageRequest;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Word-count floor for density scoring. Keeps two-word title slides from
/// scoring 0.5 on a single keyword.
pub const MIN_DENSITY_WORDS: usize = 12;

/// A scored page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCandidate {
    pub page_number: usize,
    pub category_hint: Category,
    pub relevance_score: f32,
}

/// The capped, category-grouped set of pages chosen for visual extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategicSelection {
    /// Pages per category, in the order they were taken.
    pub by_category: BTreeMap<Category, Vec<usize>>,
    /// Flattened, de-duplicated pages in fill order. Never longer than
    /// [`MAX_PAGES`].
    pub pages_to_process: Vec<usize>,
    /// Every page with at least one keyword hit, best first.
    pub candidates: Vec<PageCandidate>,
    /// Pages whose text could not be read.
    pub skipped_pages: Vec<usize>,
}

impl StrategicSelection {
    pub fn len(&self) -> usize {
        self.pages_to_process.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages_to_process.is_empty()
    }

    /// Category a selected page was taken for.
    pub fn category_of(&self, page: usize) -> Option<Category> {
        self.by_category
            .iter()
            .find(|(_, pages)| pages.contains(&page))
            .map(|(c, _)| *c)
    }

    /// Extraction requests in fill order.
    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.pages_to_process
            .iter()
            .map(|&p| PageRequest::new(p, self.category_of(p).unwrap_or(Category::Other)))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct PageScore {
    page: usize,
    scores: BTreeMap<Category, f32>,
}

impl PageScore {
    fn score_for(&self, category: Category) -> f32 {
        self.scores.get(&category).copied().unwrap_or(0.0)
    }

    /// Best category and its score; priority order breaks ties.
    fn best(&self) -> (Category, f32) {
        self.scores
            .iter()
            .fold((Category::Other, 0.0_f32), |best, (&c, &s)| {
                if s > best.1 {
                    (c, s)
                } else {
                    best
                }
            })
    }
}

fn score_page(page: usize, text: &str) -> Option<PageScore> {
    let tokens = tokenize(text);
    let denominator = tokens.len().max(MIN_DENSITY_WORDS) as f32;
    let scores: BTreeMap<Category, f32> = Category::STRATEGIC
        .iter()
        .filter_map(|&c| {
            let hits = count_hits(&tokens, c);
            (hits > 0).then(|| (c, hits as f32 / denominator))
        })
        .collect();
    (!scores.is_empty()).then_some(PageScore { page, scores })
}

/// Higher score first, then lower page number.
fn rank(a_score: f32, a_page: usize, b_score: f32, b_page: usize) -> Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(Ordering::Equal)
        .then(a_page.cmp(&b_page))
}

/// Select strategic pages from already-extracted page texts.
///
/// This is the pure core of [`select_strategic_pages`].
pub fn select_from_texts(pages: &[(usize, String)], max_pages: usize) -> StrategicSelection {
    let cap = max_pages.min(MAX_PAGES);
    let scored: Vec<PageScore> = pages
        .iter()
        .filter_map(|(page, text)| score_page(*page, text))
        .collect();

    let mut candidates: Vec<PageCandidate> = scored
        .iter()
        .map(|s| {
            let (category_hint, relevance_score) = s.best();
            PageCandidate {
                page_number: s.page,
                category_hint,
                relevance_score,
            }
        })
        .collect();
    candidates.sort_by(|a, b| rank(a.relevance_score, a.page_number, b.relevance_score, b.page_number));

    let mut taken: Vec<(usize, Category)> = Vec::with_capacity(cap);
    let is_taken = |taken: &[(usize, Category)], page: usize| taken.iter().any(|(p, _)| *p == page);

    // Pass 1: the single best page per category.
    for category in Category::STRATEGIC {
        if taken.len() >= cap {
            break;
        }
        let best = scored
            .iter()
            .filter(|s| s.score_for(category) > 0.0 && !is_taken(&taken, s.page))
            .min_by(|a, b| rank(a.score_for(category), a.page, b.score_for(category), b.page));
        if let Some(s) = best {
            debug!("Selector: page {} leads {}", s.page, category);
            taken.push((s.page, category));
        }
    }

    // Pass 2: fill by global score.
    for candidate in &candidates {
        if taken.len() >= cap {
            break;
        }
        if !is_taken(&taken, candidate.page_number) {
            taken.push((candidate.page_number, candidate.category_hint));
        }
    }

    let mut by_category: BTreeMap<Category, Vec<usize>> = BTreeMap::new();
    for (page, category) in &taken {
        by_category.entry(*category).or_default().push(*page);
    }

    StrategicSelection {
        by_category,
        pages_to_process: taken.into_iter().map(|(p, _)| p).collect(),
        candidates,
        skipped_pages: Vec::new(),
    }
}

/// Read every page's text, logging and skipping unreadable pages.
fn scan_pages(document: &DocumentHandle) -> (Vec<(usize, String)>, Vec<usize>) {
    let outcomes = match document.source().page_texts() {
        Ok(outcomes) => outcomes,
        Err(e) => {
            warn!("Selector: could not scan '{}': {}", document.reference(), e);
            return (Vec::new(), Vec::new());
        }
    };

    let mut texts = Vec::with_capacity(outcomes.len());
    let mut skipped = Vec::new();
    for (page, outcome) in outcomes {
        match outcome {
            Ok(text) => texts.push((page, text)),
            Err(e) => {
                warn!("Selector: skipping page {}: {}", page, e);
                skipped.push(page);
            }
        }
    }
    (texts, skipped)
}

/// Pick at most `max_pages` (never more than 7) high-value pages of a
/// document, grouped by category.
///
/// Blocking: reads the text layer of every page. Never fails; unreadable
/// pages are skipped and an unreadable document yields an empty selection.
pub fn select_strategic_pages(document: &DocumentHandle, max_pages: usize) -> StrategicSelection {
    if document.page_count() == 0 || max_pages == 0 {
        return StrategicSelection::default();
    }
    let (texts, skipped) = scan_pages(document);
    let mut selection = select_from_texts(&texts, max_pages);
    selection.skipped_pages = skipped;
    info!(
        "Selected {} of {} pages from '{}' ({} unreadable)",
        selection.len(),
        document.page_count(),
        document.reference(),
        selection.skipped_pages.len()
    );
    selection
}

/// Rank pages not in `exclude` for on-demand extraction.
///
/// With categories, a page's score is the sum of its scores in those
/// categories and it is read with the strongest of them; without, pages are
/// ranked by their best category. At most `limit` (never more than 3)
/// pages are returned.
pub fn rank_from_texts(
    pages: &[(usize, String)],
    categories: &[Category],
    exclude: &BTreeSet<usize>,
    limit: usize,
) -> Vec<PageRequest> {
    let limit = limit.min(MAX_PAGES_PER_MISS);
    let mut ranked: Vec<(usize, Category, f32)> = pages
        .iter()
        .filter(|(page, _)| !exclude.contains(page))
        .filter_map(|(page, text)| score_page(*page, text))
        .filter_map(|s| {
            if categories.is_empty() {
                let (c, score) = s.best();
                return Some((s.page, c, score));
            }
            let total: f32 = categories.iter().map(|&c| s.score_for(c)).sum();
            let strongest = categories
                .iter()
                .copied()
                .filter(|&c| s.score_for(c) > 0.0)
                .fold(None::<(Category, f32)>, |best, c| match best {
                    Some((_, bs)) if bs >= s.score_for(c) => best,
                    _ => Some((c, s.score_for(c))),
                });
            strongest.map(|(c, _)| (s.page, c, total))
        })
        .collect();
    ranked.sort_by(|a, b| rank(a.2, a.0, b.2, b.0));
    ranked
        .into_iter()
        .take(limit)
        .map(|(page, category, _)| PageRequest::new(page, category))
        .collect()
}

/// Blocking wrapper over [`rank_from_texts`] that scans the document.
pub fn rank_pages_for(
    document: &DocumentHandle,
    categories: &[Category],
    exclude: &BTreeSet<usize>,
    limit: usize,
) -> Vec<PageRequest> {
    let (texts, _) = scan_pages(document);
    rank_from_texts(&texts, categories, exclude, limit)
}
