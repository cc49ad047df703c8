//! Response parsing: turn a raw vision reply into content, confidence and
//! key phrases.
//!
//! The prompt asks for a JSON object
//! `{"content": "...", "confidence": 0.0-1.0, "key_phrases": ["..."]}`,
//! but models do not always comply. They wrap the object in ```json fences,
//! prepend a sentence of chatter, or ignore the format and answer in prose.
//! Parsing is therefore tolerant, in this order:
//!
//! 1. normalise line endings and strip invisible Unicode
//! 2. strip outer code fences
//! 3. parse the whole text as JSON, else the outermost `{…}` span
//! 4. fall back to treating the cleaned text as the content
//!
//! Key phrases are the model's own list plus every category keyword and
//! money/percentage figure found in the content, so the cache index stays
//! searchable even when the model returns prose.

use crate::category::{matched_keywords, Category};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;

/// Upper bound on key phrases kept per page.
pub const MAX_KEY_PHRASES: usize = 24;

const MAX_PHRASE_CHARS: usize = 60;

/// A successfully parsed page reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    pub content: String,
    pub confidence: f32,
    pub key_phrases: BTreeSet<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelReply {
    #[serde(default)]
    content: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    key_phrases: Vec<String>,
}

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:json|markdown|md)?\s*\n(.*)\n```\s*$").expect("static regex")
});

static RE_FIGURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[$€£]\s?\d[\d,.]*(?:\s?(?:k|mm|m|bn|b|million|billion)\b)?|\d[\d,.]*\s?(?:%|(?:x|k|mm|m|bn|b|million|billion)\b)",
    )
    .expect("static regex")
});

/// Phrases that mean the model could not read anything useful.
const LOW_SIGNAL_MARKERS: [&str; 5] = [
    "no data",
    "not visible",
    "unreadable",
    "cannot determine",
    "no relevant",
];

/// Parse a raw backend reply for a page of the given category.
///
/// `reported` is a confidence the backend supplied out-of-band; it wins over
/// anything inside the reply. Returns `None` when the reply carries no
/// content at all.
pub fn parse_page_response(raw: &str, reported: Option<f32>, category: Category) -> Option<ParsedPage> {
    let cleaned = strip_outer_fences(&remove_invisible_chars(&normalise_line_endings(raw)));
    let reply = parse_reply(&cleaned).unwrap_or_else(|| ModelReply {
        content: cleaned.trim().to_string(),
        ..Default::default()
    });

    let content = reply.content.trim().to_string();
    if content.is_empty() {
        return None;
    }

    let confidence = reported
        .or(reply.confidence)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or_else(|| estimate_confidence(&content));

    let key_phrases = collect_key_phrases(&content, &reply.key_phrases, category);

    Some(ParsedPage {
        content,
        confidence,
        key_phrases,
    })
}

fn parse_reply(text: &str) -> Option<ModelReply> {
    if let Ok(reply) = serde_json::from_str::<ModelReply>(text.trim()) {
        return Some(reply);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<ModelReply>(&text[start..=end]).ok()
}

/// Heuristic confidence when the model reported none.
///
/// Pages that yielded concrete figures are trusted more; replies that say
/// the page had nothing legible are trusted least.
pub fn estimate_confidence(content: &str) -> f32 {
    let lower = content.to_lowercase();
    let mut confidence: f32 = 0.5;
    if RE_FIGURE.is_match(content) {
        confidence += 0.25;
    }
    if LOW_SIGNAL_MARKERS.iter().any(|m| lower.contains(m)) {
        confidence -= 0.3;
    }
    confidence.clamp(0.1, 0.9)
}

/// Money, percentage and multiple figures mentioned in `text`.
pub fn extract_figures(text: &str) -> Vec<String> {
    RE_FIGURE
        .find_iter(text)
        .map(|m| m.as_str().trim().trim_end_matches(['.', ',']).to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn collect_key_phrases(content: &str, from_model: &[String], category: Category) -> BTreeSet<String> {
    let mut phrases = BTreeSet::new();
    let mut push = |p: String| {
        if phrases.len() < MAX_KEY_PHRASES && !p.is_empty() {
            phrases.insert(p);
        }
    };

    for p in from_model {
        push(
            p.trim()
                .to_lowercase()
                .chars()
                .take(MAX_PHRASE_CHARS)
                .collect(),
        );
    }

    // The page's own category first so its keywords survive the cap.
    let mut categories = vec![category];
    categories.extend(Category::STRATEGIC.iter().copied().filter(|&c| c != category));
    for c in categories {
        for kw in matched_keywords(content, c) {
            push(kw.to_string());
        }
    }

    for fig in extract_figures(content) {
        push(fig);
    }
    phrases
}

/// First sentences of `content`, at most `max_chars` characters.
pub fn summarize(content: &str, max_chars: usize) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let truncated: String = flat.chars().take(max_chars).collect();
    match truncated.rfind(". ") {
        Some(idx) if idx > max_chars / 3 => truncated[..=idx].to_string(),
        _ => format!("{}…", truncated.trim_end()),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'))
        .collect()
}

fn strip_outer_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}
