//! Structuring: turn the extracted-document JSON into a receipt record.
//!
//! The whole extraction file is substituted into the instruction template
//! and sent as a single system message. The answer is expected to be one
//! JSON value; [`parse_structured`] cleans and parses it.
//!
//! The model call sits behind [`Structurer`] so the orchestrator can run
//! against a scripted fake. [`LlmStructurer`] is the production
//! implementation over any `edgequake_llm` provider.
//!
//! There is no retry: a failed call fails the request with
//! [`IngestError::LlmApiError`] and the caller decides whether to resubmit.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pipeline::postprocess::clean_model_output;
use crate::prompts::render_template;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "deepseek-v3";

/// Sends a fully rendered instruction to a language model.
#[async_trait]
pub trait Structurer: Send + Sync {
    /// Return the model's raw text answer.
    async fn complete(&self, instruction: &str) -> Result<String, IngestError>;
}

/// [`Structurer`] over an `edgequake_llm` provider.
pub struct LlmStructurer {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl std::fmt::Debug for LlmStructurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmStructurer")
            .field("temperature", &self.options.temperature)
            .field("max_tokens", &self.options.max_tokens)
            .finish_non_exhaustive()
    }
}

impl LlmStructurer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &IngestConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }

    /// Resolve the provider from `config` and the environment.
    pub async fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        let provider = resolve_provider(config).await?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl Structurer for LlmStructurer {
    async fn complete(&self, instruction: &str) -> Result<String, IngestError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::system(instruction)];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| IngestError::LlmApiError {
                message: format!("{}", e),
            })?;

        debug!(
            "LLM: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the ingest config.
fn build_options(config: &IngestConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Feed the extraction file at `json_path` through `template` to the model.
///
/// The file content is inserted verbatim in place of `{data}`. Returns the
/// raw model answer.
pub async fn process_data_with_llm(
    json_path: &Path,
    template: &str,
    structurer: &dyn Structurer,
) -> Result<String, IngestError> {
    let data = tokio::fs::read_to_string(json_path)
        .await
        .map_err(|e| IngestError::io(json_path, e))?;
    let instruction = render_template(template, &data);
    info!(
        "Structuring {} ({} bytes of extracted data)",
        json_path.display(),
        data.len()
    );
    structurer.complete(&instruction).await
}

/// Parse a model answer into JSON.
///
/// An outer code fence and invisible characters are removed first. Anything
/// that still is not JSON is [`IngestError::MalformedModelOutput`].
pub fn parse_structured(answer: &str) -> Result<Value, IngestError> {
    let cleaned = clean_model_output(answer);
    serde_json::from_str(&cleaned).map_err(|e| IngestError::MalformedModelOutput {
        detail: format!("{e} (answer starts with {:?})", preview(&cleaned)),
    })
}

fn preview(s: &str) -> String {
    s.chars().take(80).collect()
}

// ── Provider resolution ──────────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IngestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model`.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    only when both are set.
/// 4. **OpenAI-compatible endpoint** when `OPENAI_API_KEY` is set. Point
///    `OPENAI_BASE_URL` at a self-hosted server to use a local model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub async fn resolve_provider(config: &IngestConfig) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY (and OPENAI_BASE_URL for a self-hosted model), \
                or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
