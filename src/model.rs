//! The chat-model seam between pipeline stages and LLM providers.
//!
//! Stages never talk to a provider directly; they call [`ChatModel`], a
//! narrow trait that returns exactly what the pipeline consumes (text plus
//! token counts). [`ProviderModel`] adapts any `edgequake_llm` provider to
//! it, and tests substitute canned implementations without touching the
//! network.

use std::sync::Arc;

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};

use crate::config::PipelineConfig;
use crate::error::LectureError;

/// What the pipeline needs back from a chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Narrow chat seam the pipeline stages call.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatReply, LectureError>;
}

/// [`ChatModel`] backed by a real provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    provider_name: String,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, provider_name: impl Into<String>) -> Self {
        Self {
            provider,
            provider_name: provider_name.into(),
        }
    }
}

#[async_trait]
impl ChatModel for ProviderModel {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatReply, LectureError> {
        match self.provider.chat(messages, Some(options)).await {
            Ok(response) => Ok(ChatReply {
                content: response.content,
                input_tokens: response.prompt_tokens as u32,
                output_tokens: response.completion_tokens as u32,
            }),
            Err(e) => Err(classify_llm_error(&self.provider_name, &e.to_string())),
        }
    }
}

/// Map a provider error string onto the retry classification.
///
/// Providers surface HTTP failures as display text, so the mapping is
/// substring-based: 429s become [`LectureError::RateLimitExceeded`] and
/// credential problems become the non-retryable [`LectureError::AuthError`].
pub fn classify_llm_error(provider: &str, detail: &str) -> LectureError {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    {
        return LectureError::RateLimitExceeded {
            provider: provider.to_string(),
            retry_after_secs: None,
        };
    }
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("unauthorised")
        || lower.contains("api key")
        || lower.contains("authentication")
    {
        return LectureError::AuthError {
            provider: provider.to_string(),
            detail: detail.to_string(),
        };
    }
    LectureError::LlmApiError {
        message: detail.to_string(),
    }
}

/// `CompletionOptions` for the faithful-extraction calls (analysis, captions,
/// ordering).
pub fn analysis_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.analysis_temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// `CompletionOptions` for script generation, where the agent's voice needs
/// room to breathe.
pub fn script_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.script_temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn ChatModel>, LectureError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        LectureError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(ProviderModel::new(provider, provider_name)))
}

/// Resolve the chat model, from most-specific to least-specific.
///
/// The five-level fallback chain lets library users and CLI users each set
/// exactly as much or as little as they need:
///
/// 1. **Pre-built seam** (`config.chat_model`) — used as-is. This is how
///    tests inject canned models and how callers add middleware.
///
/// 2. **Pre-built provider** (`config.provider`) — the caller constructed
///    and configured the provider; we only wrap it in [`ProviderModel`].
///
/// 3. **Named provider + model** (`config.provider_name`) — resolved via
///    `ProviderFactory::create_llm_provider`, which reads the matching API
///    key (`OPENAI_API_KEY`, etc.) from the environment.
///
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`) —
///    both set means the execution environment (Makefile, CI) chose; honoured
///    before auto-detection so the choice wins even when several API keys
///    are present.
///
/// 5. **Full auto-detection** (`ProviderFactory::from_env`) — scans known
///    API key variables and picks the first available provider. An OpenAI
///    key is preferred explicitly so multi-key environments stay stable.
pub fn resolve_model(config: &PipelineConfig) -> Result<Arc<dyn ChatModel>, LectureError> {
    if let Some(ref model) = config.chat_model {
        return Ok(Arc::clone(model));
    }

    if let Some(ref provider) = config.provider {
        let name = config.provider_name.as_deref().unwrap_or("custom");
        return Ok(Arc::new(ProviderModel::new(Arc::clone(provider), name)));
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
        ProviderFactory::from_env().map_err(|e| LectureError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(Arc::new(ProviderModel::new(llm_provider, "auto")))
}
