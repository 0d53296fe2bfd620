//! Inference collaborator: one text-in/text-out call with retry, timeout and
//! cancellation.
//!
//! The analyzer and the filler only see [`InferenceClient`]. The default
//! implementation wraps an `edgequake_llm::LLMProvider`; tests script their
//! own replies.
//!
//! ## Retry Strategy
//!
//! Transport errors and timeouts are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`). Malformed replies are not a
//! transport problem and are handled by the calling stage.

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::error::FormFillError;
use crate::state::Stage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{0}")]
    Api(String),
}

/// A chat-completion endpoint.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceReply, InferenceError>;
}

/// [`InferenceClient`] over an edgequake-llm provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

#[async_trait]
impl InferenceClient for ProviderClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
        let messages = vec![
            ChatMessage::system(&request.system),
            ChatMessage::user(&request.user),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| InferenceError::Api(e.to_string()))?;
        Ok(InferenceReply {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Usage counters for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub calls: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Wraps a client and counts successful calls and tokens.
pub struct MeteredClient {
    inner: Arc<dyn InferenceClient>,
    calls: AtomicUsize,
    input_tokens: AtomicUsize,
    output_tokens: AtomicUsize,
}

impl MeteredClient {
    pub fn new(inner: Arc<dyn InferenceClient>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            input_tokens: AtomicUsize::new(0),
            output_tokens: AtomicUsize::new(0),
        }
    }

    pub fn usage(&self) -> Usage {
        Usage {
            calls: self.calls.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl InferenceClient for MeteredClient {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
        let reply = self.inner.complete(request).await?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(reply.input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(reply.output_tokens, Ordering::Relaxed);
        Ok(reply)
    }
}

/// Send `request`, retrying transport failures. Every wait races `cancel`.
pub async fn complete_with_retry(
    client: &dyn InferenceClient,
    request: &InferenceRequest,
    config: &PipelineConfig,
    cancel: &CancelToken,
    stage: Stage,
) -> Result<InferenceReply, FormFillError> {
    let start = Instant::now();
    let per_call = Duration::from_secs(config.api_timeout_secs);
    let mut timed_out = false;
    let mut last_err = String::new();

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                stage, attempt, config.max_retries, backoff
            );
            cancel
                .run(sleep(Duration::from_millis(backoff)))
                .await
                .ok_or(FormFillError::Cancelled { stage })?;
        }

        let outcome = cancel
            .run(timeout(per_call, client.complete(request)))
            .await
            .ok_or(FormFillError::Cancelled { stage })?;

        match outcome {
            Ok(Ok(reply)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    stage,
                    reply.input_tokens,
                    reply.output_tokens,
                    start.elapsed()
                );
                return Ok(reply);
            }
            Ok(Err(e)) => {
                warn!("{}: attempt {} failed: {}", stage, attempt + 1, e);
                timed_out = false;
                last_err = e.to_string();
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    stage,
                    attempt + 1,
                    config.api_timeout_secs
                );
                timed_out = true;
            }
        }
    }

    if timed_out {
        Err(FormFillError::ApiTimeout {
            stage,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    } else {
        Err(FormFillError::LlmApiError {
            stage,
            message: last_err,
        })
    }
}

/// Build an [`InferenceRequest`] with the configured sampling options.
pub fn request(config: &PipelineConfig, system: &str, user: String) -> InferenceRequest {
    InferenceRequest {
        system: system.to_string(),
        user,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

const DEFAULT_MODEL: &str = "gpt-4.1-nano";
const DEFAULT_LOCAL_MODEL: &str = "mistral-nemo-instruct";

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, FormFillError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FormFillError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is
/// 2. `config.provider_name` (+ `config.model`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
/// 4. `OPENAI_API_KEY` present → OpenAI
/// 5. `ProviderFactory::from_env()`
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, FormFillError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let fallback = match name.as_str() {
            "ollama" | "lmstudio" | "lm-studio" => DEFAULT_LOCAL_MODEL,
            _ => DEFAULT_MODEL,
        };
        let model = config.model.as_deref().unwrap_or(fallback);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FormFillError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, run LM Studio/Ollama and pass --provider, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceClient for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _r: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(InferenceError::Api("503 overloaded".into()))
            } else {
                Ok(InferenceReply {
                    content: "{}".into(),
                    input_tokens: 10,
                    output_tokens: 2,
                })
            }
        }
    }

    struct Hanging {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InferenceClient for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, r: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
            self.seen.lock().unwrap().push(r.user.clone());
            std::future::pending().await
        }
    }

    fn fast_config(retries: u32) -> PipelineConfig {
        PipelineConfig::builder()
            .max_retries(retries)
            .retry_backoff_ms(1)
            .api_timeout_secs(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let client = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let config = fast_config(3);
        let req = request(&config, "sys", "user".into());
        let reply = complete_with_retry(&client, &req, &config, &CancelToken::new(), Stage::Analyzed)
            .await
            .unwrap();
        assert_eq!(reply.input_tokens, 10);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_is_api_error() {
        let client = Flaky {
            failures: 10,
            calls: AtomicUsize::new(0),
        };
        let config = fast_config(1);
        let req = request(&config, "sys", "user".into());
        let err = complete_with_retry(&client, &req, &config, &CancelToken::new(), Stage::Filled)
            .await
            .unwrap_err();
        assert!(matches!(err, FormFillError::LlmApiError { stage: Stage::Filled, .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hanging_call_times_out() {
        let client = Hanging {
            seen: Mutex::new(Vec::new()),
        };
        let config = fast_config(0);
        let req = request(&config, "sys", "user".into());
        let err = complete_with_retry(&client, &req, &config, &CancelToken::new(), Stage::Analyzed)
            .await
            .unwrap_err();
        assert!(matches!(err, FormFillError::ApiTimeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_interrupts_call() {
        let client = Hanging {
            seen: Mutex::new(Vec::new()),
        };
        let config = PipelineConfig::builder().api_timeout_secs(600).build().unwrap();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let req = request(&config, "sys", "user".into());
        let err = complete_with_retry(&client, &req, &config, &cancel, Stage::Analyzed)
            .await
            .unwrap_err();
        assert!(matches!(err, FormFillError::Cancelled { stage: Stage::Analyzed }));
        assert_eq!(client.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn metered_client_counts_successes() {
        let inner = Arc::new(Flaky {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let metered = MeteredClient::new(inner);
        let config = fast_config(2);
        let req = request(&config, "sys", "user".into());
        complete_with_retry(&metered, &req, &config, &CancelToken::new(), Stage::Analyzed)
            .await
            .unwrap();
        assert_eq!(
            metered.usage(),
            Usage {
                calls: 1,
                input_tokens: 10,
                output_tokens: 2
            }
        );
    }

    #[test]
    fn request_uses_config_sampling() {
        let config = PipelineConfig::default();
        let r = request(&config, "s", "u".into());
        assert_eq!(r.temperature, 0.1);
        assert_eq!(r.max_tokens, 2048);
    }
}
