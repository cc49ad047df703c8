//! Configuration types for strategic deck analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`]. The builder clamps every resource knob into
//! the range the extractor can honour, so a caller cannot configure its way
//! past the hard limits in [`crate::extractor`].

use crate::error::DeckScanError;
use crate::pipeline::vision::VisionBackend;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Absolute ceiling on pages sent to the vision backend in one pass.
pub const MAX_PAGES: usize = 7;

/// Absolute ceiling on concurrent outbound inference calls.
pub const MAX_CONCURRENCY: usize = 2;

/// Absolute ceiling on pages extracted on demand after a cache miss.
pub const MAX_PAGES_PER_MISS: usize = 3;

/// Configuration for a deck analysis session.
///
/// # Example
/// ```rust
/// use deckscan::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .max_pages(5)
///     .per_page_timeout_secs(8)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 5);
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Pages processed by the initial strategic pass. Range: 0–7. Default: 7.
    pub max_pages: usize,

    /// Deadline for one page (render + inference). Default: 5 s.
    ///
    /// A page exceeding it is abandoned and the pass moves on. The whole
    /// pass is additionally bounded by `max_pages × per_page_timeout`.
    pub per_page_timeout: Duration,

    /// Concurrent inference calls (logical connection slots). Range: 1–2. Default: 1.
    pub concurrency: usize,

    /// Pages extracted on demand when a question misses the cache. Range: 1–3. Default: 3.
    pub max_pages_per_miss: usize,

    /// Cache time-to-live in hours. Default: 24.
    pub cache_ttl_hours: u64,

    /// Per-session cache size ceiling in bytes. Default: 50 KiB.
    pub cache_size_ceiling: usize,

    /// Maximum rendered image dimension in pixels. Default: 1600.
    ///
    /// Deck slides are landscape and sparse; 1600 px keeps chart labels
    /// legible while holding upload size well under provider limits.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted decks.
    pub password: Option<String>,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed vision backend. Takes precedence over every provider
    /// setting; this is how tests inject a scripted backend.
    pub vision_backend: Option<Arc<dyn VisionBackend>>,

    /// Sampling temperature for the vision call. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 1024.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_pages: MAX_PAGES,
            per_page_timeout: Duration::from_secs(5),
            concurrency: 1,
            max_pages_per_miss: MAX_PAGES_PER_MISS,
            cache_ttl_hours: 24,
            cache_size_ceiling: 50 * 1024,
            max_rendered_pixels: 1600,
            password: None,
            model: None,
            provider_name: None,
            provider: None,
            vision_backend: None,
            temperature: 0.1,
            max_tokens: 1024,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("max_pages", &self.max_pages)
            .field("per_page_timeout", &self.per_page_timeout)
            .field("concurrency", &self.concurrency)
            .field("max_pages_per_miss", &self.max_pages_per_miss)
            .field("cache_ttl_hours", &self.cache_ttl_hours)
            .field("cache_size_ceiling", &self.cache_size_ceiling)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field(
                "vision_backend",
                &self.vision_backend.as_ref().map(|_| "<dyn VisionBackend>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// Cache time-to-live as a chrono duration.
    pub fn cache_ttl(&self) -> chrono::Duration {
        // chrono panics past ~292 years; a century is plenty.
        chrono::Duration::hours(self.cache_ttl_hours.min(876_000) as i64)
    }
}

/// Builder for [`AnalysisConfig`].
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl fmt::Debug for AnalysisConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.config.fmt(f)
    }
}

impl AnalysisConfigBuilder {
    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.min(MAX_PAGES);
        self
    }

    pub fn per_page_timeout(mut self, timeout: Duration) -> Self {
        self.config.per_page_timeout = timeout;
        self
    }

    pub fn per_page_timeout_secs(self, secs: u64) -> Self {
        self.per_page_timeout(Duration::from_secs(secs))
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.clamp(1, MAX_CONCURRENCY);
        self
    }

    pub fn max_pages_per_miss(mut self, n: usize) -> Self {
        self.config.max_pages_per_miss = n.clamp(1, MAX_PAGES_PER_MISS);
        self
    }

    pub fn cache_ttl_hours(mut self, hours: u64) -> Self {
        self.config.cache_ttl_hours = hours;
        self
    }

    pub fn cache_size_ceiling(mut self, bytes: usize) -> Self {
        self.config.cache_size_ceiling = bytes;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn vision_backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.vision_backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, DeckScanError> {
        let c = &self.config;
        if c.max_pages > MAX_PAGES {
            return Err(DeckScanError::InvalidConfig(format!(
                "max_pages must be ≤ {MAX_PAGES}, got {}",
                c.max_pages
            )));
        }
        if c.per_page_timeout.is_zero() {
            return Err(DeckScanError::InvalidConfig(
                "per-page timeout must be > 0".into(),
            ));
        }
        if c.concurrency == 0 || c.concurrency > MAX_CONCURRENCY {
            return Err(DeckScanError::InvalidConfig(format!(
                "concurrency must be 1–{MAX_CONCURRENCY}, got {}",
                c.concurrency
            )));
        }
        if c.cache_ttl_hours == 0 {
            return Err(DeckScanError::InvalidConfig(
                "cache TTL must be ≥ 1 hour".into(),
            ));
        }
        if c.cache_size_ceiling == 0 {
            return Err(DeckScanError::InvalidConfig(
                "cache size ceiling must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}
