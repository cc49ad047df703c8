//! Per-session extraction cache and the query router in front of it.
//!
//! An [`ExtractionCache`] holds the pages extracted for one analysis session
//! plus a category index built from them. Follow-up questions are classified
//! with the same keyword families the selector uses; a question that lands
//! on an indexed category is answered from memory, anything else is a miss
//! the caller can turn into an on-demand extraction (see
//! [`crate::analyzer::DeckAnalyzer::ask`]).
//!
//! ## Memory policy
//!
//! Run after every populate:
//!
//! 1. If the estimated size exceeds the ceiling or the cache is older than
//!    its TTL, compact: each page's verbatim content is replaced by its
//!    summary and key phrases. Index membership is untouched.
//! 2. While still over the ceiling, evict the category with the lowest
//!    average confidence (least recently hit first on ties).
//!
//! Sessions live in a [`CacheRegistry`], an ordinary owned value. Each
//! session has its own mutex, so writes to one session are serialized and
//! different sessions never wait on each other.

use crate::category::{classify_question, tokenize, Category};
use crate::config::AnalysisConfig;
use crate::output::ExtractionResult;
use crate::pipeline::parse::summarize;
use crate::selector::StrategicSelection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Characters kept per page summary.
pub const PAGE_SUMMARY_CHARS: usize = 280;

const INDEX_SUMMARY_CHARS: usize = 600;

/// Fixed per-page bookkeeping added to the size estimate.
const PAGE_OVERHEAD_BYTES: usize = 64;

/// Words ignored by the keyword fallback.
const STOP_WORDS: [&str; 24] = [
    "what", "which", "where", "when", "does", "about", "their", "there", "with", "from", "have",
    "that", "this", "they", "them", "will", "would", "could", "should", "tell", "show", "give",
    "deck", "slide",
];

/// A cached page: the extraction result plus its precomputed summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPage {
    pub result: ExtractionResult,
    pub summary: String,
    /// Whether `result.content` has been replaced by the summary.
    pub compacted: bool,
}

/// Index entry for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub keywords: BTreeSet<String>,
    pub pages: Vec<usize>,
    pub summary: String,
    pub avg_confidence: f32,
    pub last_hit: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size_estimate: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryReason {
    Matched,
    NoSession,
    EmptyCache,
    NoMatch,
}

/// Answer to one query against a session cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub cache_hit: bool,
    /// Matching pages, highest confidence first.
    pub relevant_pages: Vec<usize>,
    pub content: Option<String>,
    pub confidence: f32,
    pub reason: QueryReason,
    pub matched_categories: Vec<Category>,
    /// Pages worth extracting to answer a miss. Filled by the analyzer, not
    /// by the cache.
    pub suggested_pages: Vec<usize>,
}

impl QueryMatch {
    pub fn miss(reason: QueryReason) -> Self {
        Self {
            cache_hit: false,
            relevant_pages: Vec::new(),
            content: None,
            confidence: 0.0,
            reason,
            matched_categories: Vec::new(),
            suggested_pages: Vec::new(),
        }
    }
}

/// Extraction results of one session, indexed by category.
#[derive(Debug, Clone)]
pub struct ExtractionCache {
    entries: BTreeMap<usize, CachedPage>,
    search_index: BTreeMap<Category, IndexEntry>,
    stats: CacheStats,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    ttl: Duration,
    size_ceiling: usize,
}

impl ExtractionCache {
    pub fn new(ttl: Duration, size_ceiling: usize) -> Self {
        Self::new_at(ttl, size_ceiling, Utc::now())
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.cache_ttl(), config.cache_size_ceiling)
    }

    fn new_at(ttl: Duration, size_ceiling: usize, now: DateTime<Utc>) -> Self {
        Self {
            entries: BTreeMap::new(),
            search_index: BTreeMap::new(),
            stats: CacheStats {
                size_estimate: 0,
                hit_count: 0,
                miss_count: 0,
                last_accessed: now,
            },
            created_at: now,
            expires_at: now + ttl,
            ttl,
            size_ceiling,
        }
    }

    pub fn entries(&self) -> &BTreeMap<usize, CachedPage> {
        &self.entries
    }

    pub fn search_index(&self) -> &BTreeMap<Category, IndexEntry> {
        &self.search_index
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pages currently held.
    pub fn cached_pages(&self) -> BTreeSet<usize> {
        self.entries.keys().copied().collect()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Merge a pass's results into the cache and rebuild the index.
    ///
    /// Idempotent: populating twice with the same inputs leaves the same
    /// entries and index. Resets the expiry clock, then applies the memory
    /// policy.
    pub fn populate(
        &mut self,
        selection: &StrategicSelection,
        results: &BTreeMap<usize, ExtractionResult>,
    ) {
        self.populate_at(selection, results, Utc::now());
    }

    fn populate_at(
        &mut self,
        selection: &StrategicSelection,
        results: &BTreeMap<usize, ExtractionResult>,
        now: DateTime<Utc>,
    ) {
        for (&page, result) in results {
            let mut result = result.clone();
            if let Some(category) = selection.category_of(page) {
                result.category = category;
            }
            let summary = summarize(&result.content, PAGE_SUMMARY_CHARS);
            self.entries.insert(
                page,
                CachedPage {
                    result,
                    summary,
                    compacted: false,
                },
            );
        }
        self.rebuild_index();
        self.expires_at = now + self.ttl;
        self.recompute_size();
        self.enforce_memory_policy(now);
        debug!(
            "Cache populated: {} pages, {} categories, ~{} bytes",
            self.entries.len(),
            self.search_index.len(),
            self.stats.size_estimate
        );
    }

    fn rebuild_index(&mut self) {
        let previous = std::mem::take(&mut self.search_index);
        let mut grouped: BTreeMap<Category, Vec<&CachedPage>> = BTreeMap::new();
        for cached in self.entries.values() {
            grouped.entry(cached.result.category).or_default().push(cached);
        }

        for (category, pages) in grouped {
            let keywords: BTreeSet<String> = pages
                .iter()
                .flat_map(|p| p.result.key_phrases.iter().map(|k| k.to_lowercase()))
                .collect();
            let summary = summarize(
                &pages
                    .iter()
                    .map(|p| format!("p{}: {}", p.result.page_number, p.summary))
                    .collect::<Vec<_>>()
                    .join(" "),
                INDEX_SUMMARY_CHARS,
            );
            let avg_confidence =
                pages.iter().map(|p| p.result.confidence).sum::<f32>() / pages.len() as f32;
            self.search_index.insert(
                category,
                IndexEntry {
                    keywords,
                    pages: pages.iter().map(|p| p.result.page_number).collect(),
                    summary,
                    avg_confidence,
                    last_hit: previous.get(&category).and_then(|e| e.last_hit),
                },
            );
        }
    }

    fn recompute_size(&mut self) {
        let entries: usize = self
            .entries
            .values()
            .map(|p| {
                PAGE_OVERHEAD_BYTES
                    + p.result.content.len()
                    + p.summary.len()
                    + p.result.key_phrases.iter().map(String::len).sum::<usize>()
            })
            .sum();
        let index: usize = self
            .search_index
            .values()
            .map(|e| e.summary.len() + e.keywords.iter().map(String::len).sum::<usize>())
            .sum();
        self.stats.size_estimate = entries + index;
    }

    fn enforce_memory_policy(&mut self, now: DateTime<Utc>) {
        let too_old = now - self.created_at > self.ttl;
        if self.stats.size_estimate <= self.size_ceiling && !too_old {
            return;
        }
        let freed = self.compact();
        info!(
            "Cache compacted: freed ~{} bytes, now ~{} (ceiling {})",
            freed, self.stats.size_estimate, self.size_ceiling
        );
        while self.stats.size_estimate > self.size_ceiling {
            if self.evict_one().is_none() {
                break;
            }
        }
    }

    /// Replace every page's verbatim content with its summary and key
    /// phrases. Returns the approximate bytes freed.
    pub fn compact(&mut self) -> usize {
        let before = self.stats.size_estimate;
        for cached in self.entries.values_mut().filter(|p| !p.compacted) {
            let compacted = if cached.result.key_phrases.is_empty() {
                cached.summary.clone()
            } else {
                let phrases: Vec<&str> =
                    cached.result.key_phrases.iter().map(String::as_str).collect();
                format!("{} [key phrases: {}]", cached.summary, phrases.join(", "))
            };
            if compacted.len() < cached.result.content.len() {
                cached.result.content = compacted;
            }
            cached.compacted = true;
        }
        self.recompute_size();
        before.saturating_sub(self.stats.size_estimate)
    }

    /// Drop the pages of the weakest category. Returns the category evicted.
    pub fn evict_one(&mut self) -> Option<Category> {
        let victim = self
            .search_index
            .iter()
            .min_by(|(ca, a), (cb, b)| {
                a.avg_confidence
                    .partial_cmp(&b.avg_confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.last_hit.cmp(&b.last_hit))
                    .then(ca.cmp(cb))
            })
            .map(|(c, _)| *c)?;

        self.entries.retain(|_, p| p.result.category != victim);
        self.rebuild_index();
        self.recompute_size();
        warn!(
            "Cache over ceiling: evicted {} pages, now ~{} bytes",
            victim, self.stats.size_estimate
        );
        Some(victim)
    }

    /// Drop index entries that name pages with no cached entry.
    fn drop_corrupt_index_entries(&mut self) {
        let entries = &self.entries;
        self.search_index.retain(|category, entry| {
            let missing: Vec<usize> = entry
                .pages
                .iter()
                .copied()
                .filter(|p| !entries.contains_key(p))
                .collect();
            if missing.is_empty() {
                return true;
            }
            error!(
                "Cache index for {} names pages {:?} with no entry; dropping it",
                category, missing
            );
            false
        });
    }

    /// Answer a question from the cache. Never fails.
    ///
    /// A question that names a strategic category is answered only from
    /// that category's pages. Index keywords are consulted only when the
    /// question names no category at all.
    pub fn query(&mut self, question: &str) -> QueryMatch {
        self.query_at(question, Utc::now())
    }

    fn query_at(&mut self, question: &str, now: DateTime<Utc>) -> QueryMatch {
        self.stats.last_accessed = now;
        if self.entries.is_empty() {
            self.stats.miss_count += 1;
            return QueryMatch::miss(QueryReason::EmptyCache);
        }
        self.drop_corrupt_index_entries();

        let asked = classify_question(question);
        let matched: Vec<Category> = if asked.is_empty() {
            self.match_by_keyword(question)
        } else {
            asked
                .into_iter()
                .filter(|c| self.search_index.contains_key(c))
                .collect()
        };
        if matched.is_empty() {
            self.stats.miss_count += 1;
            debug!("Cache miss for question: {}", question);
            return QueryMatch::miss(QueryReason::NoMatch);
        }

        let mut pages: Vec<(usize, f32)> = matched
            .iter()
            .filter_map(|c| self.search_index.get(c))
            .flat_map(|e| e.pages.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|p| self.entries.get(&p).map(|e| (p, e.result.confidence)))
            .collect();
        pages.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let confidence = match matched.as_slice() {
            [single] => self
                .search_index
                .get(single)
                .map(|e| e.avg_confidence)
                .unwrap_or(0.0),
            _ => pages.iter().map(|(_, c)| c).sum::<f32>() / pages.len() as f32,
        };

        let content = pages
            .iter()
            .filter_map(|(p, _)| self.entries.get(p))
            .map(|e| {
                format!(
                    "[Page {} · {}] {}",
                    e.result.page_number, e.result.category, e.result.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        for category in &matched {
            if let Some(entry) = self.search_index.get_mut(category) {
                entry.last_hit = Some(now);
            }
        }
        self.stats.hit_count += 1;

        QueryMatch {
            cache_hit: true,
            relevant_pages: pages.into_iter().map(|(p, _)| p).collect(),
            content: Some(content),
            confidence,
            reason: QueryReason::Matched,
            matched_categories: matched,
            suggested_pages: Vec::new(),
        }
    }

    /// Categories whose index keywords share a content word with the
    /// question.
    fn match_by_keyword(&self, question: &str) -> Vec<Category> {
        let terms: Vec<String> = tokenize(question)
            .into_iter()
            .filter(|t| t.len() >= 4 && !STOP_WORDS.contains(&t.as_str()))
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }
        self.search_index
            .iter()
            .filter(|(_, entry)| {
                entry.keywords.iter().any(|kw| {
                    tokenize(kw)
                        .iter()
                        .any(|k| terms.iter().any(|t| same_word(k, t)))
                })
            })
            .map(|(c, _)| *c)
            .collect()
    }
}

fn same_word(a: &str, b: &str) -> bool {
    a == b || a.strip_suffix('s') == Some(b) || b.strip_suffix('s') == Some(a)
}

/// Session caches, keyed by session id.
pub struct CacheRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<ExtractionCache>>>>,
    ttl: Duration,
    size_ceiling: usize,
}

impl CacheRegistry {
    pub fn new(ttl: Duration, size_ceiling: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            size_ceiling,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.cache_ttl(), config.cache_size_ceiling)
    }

    /// Populate (or extend) a session's cache, creating it on first use.
    /// An expired cache is replaced by a fresh one first.
    pub async fn populate_cache(
        &self,
        session_id: &str,
        selection: &StrategicSelection,
        results: &BTreeMap<usize, ExtractionResult>,
    ) -> CacheStats {
        let cache = {
            let mut sessions = self.sessions.write().await;
            Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
                Arc::new(Mutex::new(ExtractionCache::new(self.ttl, self.size_ceiling)))
            }))
        };
        let mut cache = cache.lock().await;
        if cache.is_expired() {
            info!("Session '{}' cache expired; starting fresh", session_id);
            *cache = ExtractionCache::new(self.ttl, self.size_ceiling);
        }
        cache.populate(selection, results);
        cache.stats()
    }

    /// Answer a question for a session. Missing and expired sessions give
    /// [`QueryReason::NoSession`].
    pub async fn query_cache(&self, session_id: &str, question: &str) -> QueryMatch {
        let Some(cache) = self.session(session_id).await else {
            return QueryMatch::miss(QueryReason::NoSession);
        };
        let mut cache = cache.lock().await;
        if cache.is_expired() {
            return QueryMatch::miss(QueryReason::NoSession);
        }
        cache.query(question)
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<Mutex<ExtractionCache>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Pages already cached for a session (empty when there is none).
    pub async fn cached_pages(&self, session_id: &str) -> BTreeSet<usize> {
        match self.session(session_id).await {
            Some(cache) => cache.lock().await.cached_pages(),
            None => BTreeSet::new(),
        }
    }

    pub async fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Drop every expired session. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, cache) in sessions.iter() {
            if cache.lock().await.is_expired() {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            info!("Purged {} expired session caches", expired.len());
        }
        expired.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(page: usize, category: Category, content: &str, confidence: f32) -> ExtractionResult {
        ExtractionResult {
            page_number: page,
            category,
            content: content.to_string(),
            confidence,
            extracted_at: Utc::now(),
            key_phrases: crate::pipeline::parse::parse_page_response(content, None, category)
                .map(|p| p.key_phrases)
                .unwrap_or_default(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
        }
    }

    fn results(items: Vec<ExtractionResult>) -> BTreeMap<usize, ExtractionResult> {
        items.into_iter().map(|r| (r.page_number, r)).collect()
    }

    fn deck_results() -> BTreeMap<usize, ExtractionResult> {
        results(vec![
            result(18, Category::Financials, "Revenue $2.4M ARR, monthly burn $180K.", 0.9),
            result(19, Category::Financials, "Runway 14 months at current burn rate.", 0.7),
            result(11, Category::Competition, "Competitor matrix versus three incumbents.", 0.6),
            result(3, Category::Team, "Founders: ex-Stripe CTO and ex-McKinsey CEO.", 0.8),
        ])
    }

    fn cache() -> ExtractionCache {
        ExtractionCache::new(Duration::hours(24), 50 * 1024)
    }

    #[test]
    fn populate_is_idempotent() {
        let mut a = cache();
        let sel = StrategicSelection::default();
        a.populate(&sel, &deck_results());
        let entries = a.entries().clone();
        let index = a.search_index().clone();
        let size = a.stats().size_estimate;

        a.populate(&sel, &deck_results());

        assert_eq!(a.entries().len(), entries.len());
        assert_eq!(a.search_index(), &index);
        assert_eq!(a.stats().size_estimate, size);
    }

    #[test]
    fn every_indexed_page_has_an_entry() {
        let mut c = cache();
        c.populate(&StrategicSelection::default(), &deck_results());
        for entry in c.search_index().values() {
            for page in &entry.pages {
                assert!(c.entries().contains_key(page));
            }
        }
    }

    #[test]
    fn burn_rate_question_hits_financial_pages() {
        let mut c = cache();
        c.populate(&StrategicSelection::default(), &deck_results());

        let m = c.query("what is the burn rate?");

        assert!(m.cache_hit);
        assert_eq!(m.reason, QueryReason::Matched);
        assert_eq!(m.relevant_pages, vec![18, 19]);
        assert!((m.confidence - 0.8).abs() < 1e-6);
        assert!(m.content.unwrap().contains("$180K"));
        assert_eq!(c.stats().hit_count, 1);
    }

    #[test]
    fn unknown_category_is_a_miss() {
        let mut c = cache();
        c.populate(
            &StrategicSelection::default(),
            &results(vec![result(18, Category::Financials, "Revenue $2.4M", 0.9)]),
        );

        let m = c.query("who is on the founding team?");

        assert!(!m.cache_hit);
        assert_eq!(m.reason, QueryReason::NoMatch);
        assert!(m.suggested_pages.is_empty());
        assert_eq!(c.stats().miss_count, 1);
    }

    #[test]
    fn category_question_ignores_other_pages_mentioning_its_keywords() {
        let mut c = cache();
        c.populate(
            &StrategicSelection::default(),
            &results(vec![result(
                18,
                Category::Financials,
                "Revenue $2.4M ARR; the market for our product keeps expanding.",
                0.9,
            )]),
        );

        let m = c.query("What is the market size?");

        assert!(!m.cache_hit);
        assert_eq!(m.reason, QueryReason::NoMatch);
        assert!(m.matched_categories.is_empty());
        assert!(c.query("What is our revenue?").cache_hit);
    }

    #[test]
    fn empty_cache_is_reported() {
        let mut c = cache();
        assert_eq!(c.query("revenue?").reason, QueryReason::EmptyCache);
    }

    #[test]
    fn multiple_categories_union_sorted_by_confidence() {
        let mut c = cache();
        c.populate(&StrategicSelection::default(), &deck_results());

        let m = c.query("how does revenue compare to competitors?");

        assert_eq!(m.relevant_pages, vec![18, 19, 11]);
        assert_eq!(m.matched_categories.len(), 2);
        assert!((m.confidence - (0.9 + 0.7 + 0.6) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn selection_category_overrides_result_category() {
        let mut c = cache();
        let mut sel = StrategicSelection::default();
        sel.by_category.insert(Category::Market, vec![7]);
        sel.pages_to_process = vec![7];
        c.populate(
            &sel,
            &results(vec![result(7, Category::Other, "TAM $40B", 0.5)]),
        );
        assert_eq!(c.search_index().keys().copied().collect::<Vec<_>>(), vec![Category::Market]);
    }

    #[test]
    fn content_words_match_index_keywords_as_fallback() {
        let mut c = cache();
        let mut page = result(12, Category::Other, "Kubernetes migration plan.", 0.6);
        page.key_phrases.insert("Kubernetes".into());
        c.populate(&StrategicSelection::default(), &results(vec![page]));

        let m = c.query("anything on kubernetes?");

        assert!(m.cache_hit);
        assert_eq!(m.relevant_pages, vec![12]);
    }

    #[test]
    fn compaction_keeps_every_category_searchable() {
        let mut c = cache();
        let long = "Revenue grew steadily. ".repeat(40);
        let mut items = deck_results();
        items.insert(20, result(20, Category::Market, &format!("TAM $40B. {long}"), 0.5));
        c.populate(&StrategicSelection::default(), &items);
        let categories: Vec<Category> = c.search_index().keys().copied().collect();
        let size = c.stats().size_estimate;

        let freed = c.compact();

        assert!(freed > 0);
        assert!(c.stats().size_estimate < size);
        assert_eq!(c.search_index().keys().copied().collect::<Vec<_>>(), categories);
        assert!(c.entries().values().all(|p| p.compacted));
        assert!(c.query("what is the burn rate?").cache_hit);
        assert!(c.query("who are the founders?").cache_hit);
    }

    #[test]
    fn old_cache_is_compacted_on_populate() {
        let t0 = Utc::now();
        let mut c = ExtractionCache::new_at(Duration::hours(24), 50 * 1024, t0);
        let sel = StrategicSelection::default();
        c.populate_at(&sel, &deck_results(), t0);
        c.populate_at(&sel, &deck_results(), t0 + Duration::hours(20));
        assert!(c.entries().values().all(|p| !p.compacted));

        c.populate_at(&sel, &deck_results(), t0 + Duration::hours(40));

        assert!(!c.is_expired_at(t0 + Duration::hours(40)));
        assert!(c.entries().values().all(|p| p.compacted));
    }

    #[test]
    fn over_ceiling_evicts_lowest_confidence_category() {
        let financials = results(vec![
            result(18, Category::Financials, "Revenue $2.4M ARR, monthly burn $180K.", 0.9),
            result(19, Category::Financials, "Runway 14 months at current burn rate.", 0.7),
        ]);
        let mut reference = cache();
        reference.populate(&StrategicSelection::default(), &financials);
        reference.compact();
        let ceiling = reference.stats().size_estimate;

        let mut both = financials.clone();
        both.insert(3, result(3, Category::Team, "Founders: ex-Stripe CTO.", 0.3));
        let mut c = ExtractionCache::new(Duration::hours(24), ceiling);
        c.populate(&StrategicSelection::default(), &both);

        assert_eq!(c.cached_pages(), BTreeSet::from([18, 19]));
        assert!(c.search_index().contains_key(&Category::Financials));
        assert!(!c.search_index().contains_key(&Category::Team));
        assert!(c.stats().size_estimate <= ceiling);
    }

    #[test]
    fn eviction_ties_go_to_least_recently_hit() {
        let mut c = cache();
        c.populate(
            &StrategicSelection::default(),
            &results(vec![
                result(18, Category::Financials, "Revenue $2M", 0.5),
                result(3, Category::Team, "Founders", 0.5),
            ]),
        );
        assert!(c.query("revenue?").cache_hit);

        assert_eq!(c.evict_one(), Some(Category::Team));
        assert_eq!(c.evict_one(), Some(Category::Financials));
        assert_eq!(c.evict_one(), None);
        assert!(c.is_empty());
    }

    #[test]
    fn corrupt_index_entry_is_dropped() {
        let mut c = cache();
        c.populate(&StrategicSelection::default(), &deck_results());
        c.entries.remove(&19);

        let m = c.query("what is the burn rate?");

        assert_eq!(m.reason, QueryReason::NoMatch);
        assert!(!c.search_index().contains_key(&Category::Financials));
        assert!(c.query("competitors?").cache_hit);
    }

    #[test]
    fn expiry_follows_last_populate() {
        let t0 = Utc::now();
        let mut c = ExtractionCache::new_at(Duration::hours(24), 50 * 1024, t0);
        c.populate_at(&StrategicSelection::default(), &deck_results(), t0);
        assert!(!c.is_expired_at(t0 + Duration::hours(23)));
        assert!(c.is_expired_at(t0 + Duration::hours(24)));
    }

    #[tokio::test]
    async fn registry_unknown_session_is_no_session() {
        let registry = CacheRegistry::new(Duration::hours(24), 50 * 1024);
        let m = registry.query_cache("nobody", "revenue?").await;
        assert_eq!(m.reason, QueryReason::NoSession);
    }

    #[tokio::test]
    async fn registry_sessions_are_isolated() {
        let registry = CacheRegistry::new(Duration::hours(24), 50 * 1024);
        registry
            .populate_cache("alice", &StrategicSelection::default(), &deck_results())
            .await;

        assert!(registry.query_cache("alice", "burn rate?").await.cache_hit);
        assert_eq!(
            registry.query_cache("bob", "burn rate?").await.reason,
            QueryReason::NoSession
        );
        assert_eq!(registry.session_count().await, 1);
        assert_eq!(
            registry.cached_pages("alice").await,
            BTreeSet::from([3, 11, 18, 19])
        );
        assert!(registry.remove_session("alice").await);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn registry_expired_sessions_are_purged() {
        let registry = CacheRegistry::new(Duration::zero(), 50 * 1024);
        registry
            .populate_cache("alice", &StrategicSelection::default(), &deck_results())
            .await;

        assert_eq!(
            registry.query_cache("alice", "burn rate?").await.reason,
            QueryReason::NoSession
        );
        assert_eq!(registry.purge_expired().await, 1);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_populates_on_one_session_serialize() {
        let registry = Arc::new(CacheRegistry::new(Duration::hours(24), 50 * 1024));
        let sel = StrategicSelection::default();
        let first = results(vec![result(18, Category::Financials, "Revenue $2M", 0.9)]);
        let second = results(vec![result(3, Category::Team, "Founders", 0.8)]);

        tokio::join!(
            registry.populate_cache("s", &sel, &first),
            registry.populate_cache("s", &sel, &second)
        );

        assert_eq!(registry.cached_pages("s").await, BTreeSet::from([3, 18]));
    }
}
