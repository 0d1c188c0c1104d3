//! Extraction-service boundary: build the vision request and call the model.
//!
//! This module packages a chunk of encoded page images plus the fixed
//! instruction prompt into one model invocation and decodes the structured
//! response. It is intentionally thin — all prompt engineering lives in
//! [`crate::prompts`] and all contract enforcement in
//! [`crate::pipeline::parse`], so either can change without touching the
//! request plumbing here.
//!
//! ## No automatic retry
//!
//! A failed call surfaces immediately and aborts the batch's remaining
//! chunks; drafts persisted by earlier chunks survive. Recovery is
//! operator-initiated (re-run the batch), so a transient API error never
//! silently multiplies the service load.

use crate::config::ExtractionConfig;
use crate::error::HistocaseError;
use crate::pipeline::parse::{self, ParsedCase};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Per-call token accounting, summed into the batch stats.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One extraction call: a chunk of page images in, structured cases out.
///
/// The orchestrator only ever talks to this trait, so tests script
/// extraction results without a live provider and the production
/// implementation stays swappable.
#[async_trait]
pub trait CaseExtractor: Send + Sync {
    /// Extract all diagnosable cases from one chunk of page images.
    ///
    /// `images` are the chunk's pages in order; `page_index` values in the
    /// result refer to that order. An empty result is a valid outcome.
    async fn extract_cases(
        &self,
        images: &[ImageData],
    ) -> Result<(Vec<ParsedCase>, ExtractUsage), HistocaseError>;
}

/// Production extractor backed by an `edgequake-llm` vision provider.
pub struct VisionExtractor {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl VisionExtractor {
    /// Build from config, resolving the provider if one wasn't supplied.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, HistocaseError> {
        Ok(Self {
            provider: resolve_provider(config)?,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CaseExtractor for VisionExtractor {
    /// ## Message Layout
    ///
    /// The request contains (in order):
    /// 1. **System message** — the extraction contract prompt
    /// 2. **User message** — the chunk's page PNGs as base64 image
    ///    attachments (empty text)
    ///
    /// The empty user text is intentional: vision APIs require at least one
    /// user turn to respond to, but the images carry all the actual content.
    async fn extract_cases(
        &self,
        images: &[ImageData],
    ) -> Result<(Vec<ParsedCase>, ExtractUsage), HistocaseError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images("", images.to_vec()),
        ];

        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| HistocaseError::ApiError {
                message: e.to_string(),
            })?;

        debug!(
            "Chunk extracted: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        let cases = parse::parse_cases(&response.content)?;
        Ok((
            cases,
            ExtractUsage {
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            },
        ))
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, HistocaseError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        HistocaseError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the vision provider, from most-specific to least-specific.
///
/// The four-level fallback chain lets library users and CLI users each set
/// exactly as much or as little as they need:
///
/// 1. **Pre-built provider** (`config.provider`) — the caller constructed
///    and configured the provider entirely; we use it as-is.
///
/// 2. **Named provider + model** (`config.provider_name`) — the factory
///    reads the corresponding API key (`OPENAI_API_KEY`, etc.) from the
///    environment.
///
/// 3. **Environment pair** (`HISTOCASE_LLM_PROVIDER` + `HISTOCASE_MODEL`) —
///    both set means the execution environment (Makefile, shell script, CI)
///    chose for every run; honoured even when multiple API keys are present.
///
/// 4. **Full auto-detection** (`ProviderFactory::from_env`) — scans all
///    known API key variables and picks the first available provider, with
///    an explicit preference for OpenAI when several keys are set.
pub fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<Arc<dyn LLMProvider>, HistocaseError> {
    // 1) User-provided provider takes priority
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    // 2) Provider name + model
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    // 3) Environment pair
    if let (Ok(prov), Ok(model)) = (
        std::env::var("HISTOCASE_LLM_PROVIDER"),
        std::env::var("HISTOCASE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    // Prefer OpenAI explicitly when an OpenAI API key is present, so users
    // with multiple provider keys get a deterministic default.
    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| HistocaseError::ProviderNotConfigured {
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
