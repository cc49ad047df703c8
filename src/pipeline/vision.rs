//! Vision inference: the [`VisionBackend`] capability and its edgequake-llm
//! implementation.
//!
//! The extractor only ever talks to `Arc<dyn VisionBackend>`. Which backend
//! that is gets decided once, when the [`crate::analyzer::DeckAnalyzer`] is
//! constructed: a real provider ([`LlmVisionBackend`]) in production, a
//! scripted double ([`crate::testing::MockVisionBackend`]) in tests. Business
//! logic never checks whether it is running against a mock.
//!
//! This module does no retrying and no timing out. The extractor owns the
//! deadline, and a failed page is retried only by a later on-demand pass.

use crate::category::Category;
use crate::config::AnalysisConfig;
use crate::error::{DeckScanError, VisionError};
use crate::pipeline::encode::encode_page;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Everything a backend needs to ask about one page.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionPrompt {
    pub page_number: usize,
    pub category: Category,
    pub system: String,
    pub user: String,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Raw reply from a vision backend.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    /// Model output, usually the JSON object requested by the prompt.
    pub content: String,
    /// Confidence reported out-of-band by the backend, if any. When `None`
    /// the parser looks for one inside `content`, then estimates.
    pub confidence: Option<f32>,
    pub usage: TokenUsage,
}

/// A vision-capable inference call.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Ask the model about one rendered page.
    async fn vision_extract(
        &self,
        image_png: &[u8],
        prompt: &VisionPrompt,
    ) -> Result<VisionResponse, VisionError>;
}

/// [`VisionBackend`] over any edgequake-llm provider.
pub struct LlmVisionBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmVisionBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AnalysisConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

#[async_trait]
impl VisionBackend for LlmVisionBackend {
    async fn vision_extract(
        &self,
        image_png: &[u8],
        prompt: &VisionPrompt,
    ) -> Result<VisionResponse, VisionError> {
        let messages = vec![
            ChatMessage::system(prompt.system.as_str()),
            ChatMessage::user_with_images(prompt.user.as_str(), vec![encode_page(image_png)]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            prompt.page_number, response.prompt_tokens, response.completion_tokens
        );

        Ok(VisionResponse {
            content: response.content,
            confidence: None,
            usage: TokenUsage {
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            },
        })
    }
}

/// Sort a provider error message into timeout / permanent / transient.
fn classify_provider_error(message: &str) -> VisionError {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        VisionError::Timeout(message.to_string())
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("content_filter")
    {
        VisionError::Permanent(message.to_string())
    } else {
        VisionError::Transient(message.to_string())
    }
}

/// Build `CompletionOptions` from the analysis config.
fn build_options(config: &AnalysisConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Resolve the vision backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.vision_backend`), used as-is.
/// 2. **Pre-built provider** (`config.provider`), wrapped.
/// 3. **Named provider + model** (`config.provider_name`).
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **`OPENAI_API_KEY`** present → OpenAI with the configured model.
/// 6. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_backend(config: &AnalysisConfig) -> Result<Arc<dyn VisionBackend>, DeckScanError> {
    if let Some(ref backend) = config.vision_backend {
        return Ok(Arc::clone(backend));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmVisionBackend::new(provider, config)))
}

fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, DeckScanError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DeckScanError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DeckScanError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DeckScanError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
