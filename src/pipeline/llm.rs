//! Recognition service: turn a rendered page into text.
//!
//! [`Recognizer`] is the seam the page processor depends on. The production
//! implementation, [`LlmRecognizer`], sends the page PNG plus the prompt to a
//! vision-capable provider through `edgequake-llm`. Tests substitute scripted
//! fakes.
//!
//! A single call either yields text, fails transiently (network, quota,
//! deadline), or yields nothing. Blank output is reported as
//! [`RecognitionError::EmptyResponse`] here so the caller can treat a refusal
//! as terminal without inspecting strings. Retrying is the caller's job.

use crate::error::{IngestError, RecognitionError};
use crate::pipeline::encode::encode_page;
use crate::pipeline::render::RasterImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Makes one recognition call per invocation.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognise the text on `image`, following `prompt`.
    async fn recognize(&self, image: &RasterImage, prompt: &str)
        -> Result<String, RecognitionError>;
}

/// [`Recognizer`] backed by a vision LLM provider.
pub struct LlmRecognizer {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    call_timeout: Option<Duration>,
}

impl LlmRecognizer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(0.0),
                max_tokens: Some(8192),
                ..Default::default()
            },
            call_timeout: None,
        }
    }

    /// Abort a single call after `secs`; the abort counts as a transient failure.
    pub fn with_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.call_timeout = secs.map(Duration::from_secs);
        self
    }

    /// Resolve a provider, from most-specific to least-specific:
    ///
    /// 1. **Named provider + model** — `provider_name` given; model defaults
    ///    to [`DEFAULT_MODEL`]. The API key is read from the provider's usual
    ///    environment variable.
    /// 2. **Environment pair** — `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
    /// 3. **Auto-detection** — `ProviderFactory::from_env()` picks the first
    ///    provider whose API key is present.
    pub fn from_env(
        provider_name: Option<&str>,
        model: Option<&str>,
    ) -> Result<Self, IngestError> {
        let provider = resolve_provider(provider_name, model)?;
        Ok(Self::new(provider))
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IngestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn resolve_provider(
    provider_name: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(name) = provider_name {
        return create_vision_provider(name, model.unwrap_or(DEFAULT_MODEL));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No recognition provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[async_trait]
impl Recognizer for LlmRecognizer {
    async fn recognize(
        &self,
        image: &RasterImage,
        prompt: &str,
    ) -> Result<String, RecognitionError> {
        let start = Instant::now();
        let image_data = encode_page(image).map_err(|e| RecognitionError::Transient {
            detail: format!("image encoding failed: {e}"),
        })?;

        let messages = vec![ChatMessage::user_with_images(prompt, vec![image_data])];
        let call = self.provider.chat(&messages, Some(&self.options));

        let response = match self.call_timeout {
            Some(limit) => timeout(limit, call)
                .await
                .map_err(|_| RecognitionError::Timeout {
                    secs: limit.as_secs(),
                })?,
            None => call.await,
        }
        .map_err(|e| RecognitionError::Transient {
            detail: format!("{e}"),
        })?;

        debug!(
            "{} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        non_empty(response.content)
    }
}

/// Map blank text to [`RecognitionError::EmptyResponse`].
pub fn non_empty(text: String) -> Result<String, RecognitionError> {
    if text.trim().is_empty() {
        Err(RecognitionError::EmptyResponse)
    } else {
        Ok(text)
    }
}
