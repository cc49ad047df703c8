//! Prompts for category-specific page extraction.
//!
//! Every page is sent with the same system prompt (the output contract) and
//! a user prompt tailored to the category the selector assigned the page to.
//! The tailored wording biases the model toward the figures that matter for
//! that kind of slide: a financials chart should yield revenue and burn
//! numbers, not a description of its colour scheme.
//!
//! Callers can override the system prompt via
//! [`crate::config::AnalysisConfig::system_prompt`]; category focus is
//! always appended to the user turn.

use crate::category::Category;
use crate::pipeline::vision::VisionPrompt;

/// Default system prompt for reading one pitch-deck page image.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an analyst reading a single slide from a startup pitch deck. The slide is provided as an image; its content is mostly graphical (charts, tables rendered as images, infographics).

Rules:

1. Extract only what is visible on the slide. Never invent figures.
2. Prefer concrete numbers with their units and periods ($2.4M ARR, 18% MoM, Q3 2024).
3. Read chart axes, legends and data labels; state trends the chart makes explicit.
4. Ignore logos, decorative imagery, page numbers and repeated footers.

Reply with a single JSON object and nothing else:
{"content": "<concise plain-text extraction>", "confidence": <0.0-1.0, how legible and complete the slide was>, "key_phrases": ["<short searchable phrases and figures>"]}"#;

/// Category focus appended to the user turn.
pub fn category_focus(category: Category) -> &'static str {
    match category {
        Category::Financials => {
            "Focus on financial figures: revenue, ARR/MRR, burn rate, runway, gross margin, \
             unit economics (CAC, LTV), projections, the funding ask and use of funds."
        }
        Category::Traction => {
            "Focus on traction metrics: user and customer counts, MAU/DAU, growth rates, \
             retention and churn, cohort charts, pipeline and notable milestones."
        }
        Category::Market => {
            "Focus on market sizing: TAM, SAM and SOM with their sources and methodology, \
             market growth (CAGR) and the target segments."
        }
        Category::Competition => {
            "Focus on the competitive landscape: named competitors, positioning axes or \
             comparison tables, claimed differentiators and moats."
        }
        Category::Team => {
            "Focus on the team: founders and executives with roles and prior experience, \
             advisors, board members and key hires."
        }
        Category::Other => {
            "Extract the slide's key claims and any figures, in the order a reader would \
             encounter them."
        }
    }
}

/// Build the full prompt for one page.
pub fn page_prompt(page_number: usize, category: Category, system_override: Option<&str>) -> VisionPrompt {
    VisionPrompt {
        page_number,
        category,
        system: system_override.unwrap_or(DEFAULT_SYSTEM_PROMPT).to_string(),
        user: format!(
            "Slide {page_number} ({category} slide). {}",
            category_focus(category)
        ),
    }
}
