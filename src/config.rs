//! Configuration types for batch case extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across calls, serialise them for logging, and
//! diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::HistocaseError;
use crate::pipeline::extract::CaseExtractor;
use crate::progress::BatchProgress;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for importing pages and running batch extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use histocase::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .chunk_size(2)
///     .dpi(150)
///     .model("gpt-4.1-nano")
///     .owner("annotator-01")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Pages per extraction-service call. Default: 2. Minimum: 1.
    ///
    /// Chunks are processed strictly sequentially, so this value is the
    /// throughput-limiting policy for the whole batch — it bounds how much
    /// image payload one model call carries and how much work is lost when a
    /// call fails. It is a configuration value rather than a constant because
    /// the right bound depends on the extraction service's own rate limits.
    pub chunk_size: usize,

    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps gross-photograph detail and printed case text sharp
    /// enough for a vision model while staying well below typical API upload
    /// limits. Increase to 200–300 for small-font textbooks.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap independent of DPI so an oversized scan cannot exhaust
    /// memory; either dimension is capped and the other scales
    /// proportionally.
    pub max_rendered_pixels: u32,

    /// Page selection applied at import. Default: all pages.
    pub pages: PageSelection,

    /// Operator session that will own extracted drafts. Default: "local".
    pub owner: String,

    /// Vision model identifier, e.g. "gpt-4.1-nano", "claude-sonnet-4-20250514".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "gemini").
    /// If None along with `provider`, the provider is auto-detected from the
    /// environment.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed extractor. Takes precedence over every provider
    /// field. This is the seam tests use to script extraction results
    /// without a live model.
    pub extractor: Option<Arc<dyn CaseExtractor>>,

    /// Sampling temperature for the extraction completion. Default: 0.1.
    ///
    /// Low temperature keeps the model faithful to what is printed on the
    /// page — transcription, not creativity.
    pub temperature: f32,

    /// Maximum tokens the model may generate per chunk. Default: 8192.
    ///
    /// A chunk can yield several cases, each with seven text sections and
    /// figure metadata; truncation here silently drops trailing cases, so
    /// the ceiling is set generously.
    pub max_tokens: usize,

    /// Custom instruction prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Progress callback fired per chunk during a batch run.
    pub progress: Option<Arc<dyn BatchProgress>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2,
            dpi: 150,
            max_rendered_pixels: 2000,
            pages: PageSelection::default(),
            owner: "local".to_string(),
            model: None,
            provider_name: None,
            provider: None,
            extractor: None,
            temperature: 0.1,
            max_tokens: 8192,
            system_prompt: None,
            download_timeout_secs: 120,
            progress: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("chunk_size", &self.chunk_size)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pages", &self.pages)
            .field("owner", &self.owner)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn CaseExtractor>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.config.owner = owner.into();
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

    pub fn extractor(mut self, extractor: Arc<dyn CaseExtractor>) -> Self {
        self.config.extractor = Some(extractor);
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

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress(mut self, cb: Arc<dyn BatchProgress>) -> Self {
        self.config.progress = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, HistocaseError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(HistocaseError::InvalidConfig(
                "Chunk size must be ≥ 1".into(),
            ));
        }
        if c.dpi < 72 || c.dpi > 400 {
            return Err(HistocaseError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.owner.trim().is_empty() {
            return Err(HistocaseError::InvalidConfig(
                "Owner must be non-empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of a document to import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Import all pages (default).
    #[default]
    All,
    /// Import a single page (1-indexed).
    Single(usize),
    /// Import a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Import specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
