//! Semantic page categories and the keyword families that define them.
//!
//! The same families drive two decisions: which pages the selector
//! considers high-value ([`crate::selector`]) and which cached pages a
//! follow-up question is routed to ([`crate::cache`]). Keeping them in one
//! table guarantees that a page selected as "financials" is also the page a
//! question about burn rate finds.
//!
//! Matching works on lowercase word tokens. A single-word keyword also
//! matches its plural (`competitor` ↔ `competitors`); a multi-word keyword
//! (`market size`) matches as a contiguous phrase.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A semantic bucket used for page scoring and query routing.
///
/// Variants are declared in fill-priority order: when the selector takes one
/// page per category, financials are taken first and team last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Financials,
    Traction,
    Market,
    Competition,
    Team,
    Other,
}

impl Category {
    /// The five selectable categories, in priority order.
    pub const STRATEGIC: [Category; 5] = [
        Category::Financials,
        Category::Traction,
        Category::Market,
        Category::Competition,
        Category::Team,
    ];

    /// Keyword family for this category. `Other` has none.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Category::Financials => &[
                "revenue",
                "burn",
                "burn rate",
                "runway",
                "arr",
                "mrr",
                "ebitda",
                "margin",
                "gross margin",
                "profit",
                "profitability",
                "cash",
                "financials",
                "financial",
                "projection",
                "forecast",
                "valuation",
                "unit economics",
                "cac",
                "ltv",
                "funding",
                "raise",
            ],
            Category::Traction => &[
                "growth",
                "retention",
                "mau",
                "dau",
                "user",
                "customer",
                "traction",
                "churn",
                "engagement",
                "signup",
                "download",
                "cohort",
                "nps",
                "mom",
                "yoy",
                "milestone",
            ],
            Category::Market => &[
                "tam",
                "sam",
                "som",
                "market",
                "market size",
                "addressable",
                "segment",
                "industry",
                "cagr",
                "opportunity",
            ],
            Category::Competition => &[
                "competitor",
                "competition",
                "competitive",
                "vs",
                "versus",
                "positioning",
                "landscape",
                "alternative",
                "differentiation",
                "moat",
                "incumbent",
            ],
            Category::Team => &[
                "founder",
                "cofounder",
                "team",
                "advisory",
                "advisor",
                "ceo",
                "cto",
                "cfo",
                "coo",
                "board",
                "leadership",
                "hire",
            ],
            Category::Other => &[],
        }
    }

    /// Stable lowercase name, as used in prompts and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Financials => "financials",
            Category::Traction => "traction",
            Category::Market => "market",
            Category::Competition => "competition",
            Category::Team => "team",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static RE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z0-9]+(?:[&'][a-z0-9]+)*").expect("static regex"));

/// Split text into lowercase word tokens.
///
/// Hyphens separate words except in `co-founder`, which is folded into a
/// single `cofounder` token so it does not also count as `founder`.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase().replace("co-founder", "cofounder");
    RE_WORD
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn token_matches(token: &str, keyword: &str) -> bool {
    token == keyword
        || token
            .strip_suffix('s')
            .is_some_and(|stem| stem == keyword)
        || token
            .strip_suffix("es")
            .is_some_and(|stem| stem == keyword)
}

/// Count keyword hits for one category over pre-tokenised text.
pub fn count_hits(tokens: &[String], category: Category) -> usize {
    let mut hits = 0;
    for keyword in category.keywords() {
        if keyword.contains(' ') {
            let phrase: Vec<&str> = keyword.split(' ').collect();
            hits += tokens
                .windows(phrase.len())
                .filter(|w| {
                    w.iter()
                        .zip(&phrase)
                        .all(|(t, k)| token_matches(t, k))
                })
                .count();
        } else {
            hits += tokens.iter().filter(|t| token_matches(t, keyword)).count();
        }
    }
    hits
}

/// Keyword hit counts for every strategic category with at least one hit,
/// sorted by hits descending (priority order breaks ties).
pub fn category_hits(text: &str) -> Vec<(Category, usize)> {
    let tokens = tokenize(text);
    let mut hits: Vec<(Category, usize)> = Category::STRATEGIC
        .iter()
        .map(|&c| (c, count_hits(&tokens, c)))
        .filter(|&(_, n)| n > 0)
        .collect();
    hits.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    hits
}

/// Categories a question is about, strongest first. Empty when the question
/// uses none of the keyword families.
pub fn classify_question(question: &str) -> Vec<Category> {
    category_hits(question).into_iter().map(|(c, _)| c).collect()
}

/// Keywords of `category` that occur in `text`, in their canonical form.
pub fn matched_keywords(text: &str, category: Category) -> Vec<&'static str> {
    let tokens = tokenize(text);
    category
        .keywords()
        .iter()
        .copied()
        .filter(|kw| {
            if kw.contains(' ') {
                let phrase: Vec<&str> = kw.split(' ').collect();
                tokens.windows(phrase.len()).any(|w| {
                    w.iter()
                        .zip(&phrase)
                        .all(|(t, k)| token_matches(t, k))
                })
            } else {
                tokens.iter().any(|t| token_matches(t, kw))
            }
        })
        .collect()
}
