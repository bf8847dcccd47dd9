//! VLM interaction: one generation call per batch, with retry.
//!
//! The runner only sees [`GenerationClient`]: "here is a prompt and some page
//! images, give me text". [`VisionClient`] implements it over any
//! `edgequake-llm` provider; tests substitute their own.
//!
//! ## Lazy construction
//!
//! Building a provider reads API keys from the environment and can fail.
//! [`LazyClient`] builds the client on the first job that needs it and
//! shares it with every later job. A failed build is not cached: that job
//! fails, and the next one tries again.
//!
//! ## Retry Strategy
//!
//! Errors and empty answers are both retried, up to `retry_limit` extra
//! attempts with exponential backoff (`backoff_ms * 2^(attempt-1)`). With
//! 500 ms base and 2 retries the waits are 500 ms then 1 s. Exhaustion is
//! reported as a [`BatchError`], never as a job failure.

use crate::config::ServiceConfig;
use crate::error::{BatchError, Pdf2MdError};
use crate::pipeline::batch::Batch;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Produces text from a prompt plus ordered page images.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// One remote call. May fail, and may return empty text.
    async fn generate(&self, prompt: &str, images: &[ImageData]) -> Result<String, Pdf2MdError>;
}

/// Builds the process-wide [`GenerationClient`].
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn GenerationClient>, Pdf2MdError>;
}

// ── Vision client over edgequake-llm ─────────────────────────────────────

/// [`GenerationClient`] that sends a system prompt and one user message
/// carrying the batch request text and the page images.
pub struct VisionClient {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    call_timeout: Duration,
}

impl VisionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ServiceConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            call_timeout: Duration::from_secs(config.api_timeout_secs.max(1)),
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl GenerationClient for VisionClient {
    async fn generate(&self, prompt: &str, images: &[ImageData]) -> Result<String, Pdf2MdError> {
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(prompt, images.to_vec()),
        ];
        let options = self.options();

        let started = Instant::now();
        let response = timeout(self.call_timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| Pdf2MdError::ApiTimeout {
                secs: self.call_timeout.as_secs(),
            })?
            .map_err(|e| Pdf2MdError::LlmApiError {
                message: e.to_string(),
            })?;

        debug!(
            "{} images: {} input tokens, {} output tokens, {:?}",
            images.len(),
            response.prompt_tokens,
            response.completion_tokens,
            started.elapsed()
        );
        Ok(response.content)
    }
}

/// [`ClientFactory`] that resolves a provider from the service config and
/// the environment.
pub struct VisionClientFactory {
    config: Arc<ServiceConfig>,
}

impl VisionClientFactory {
    pub fn new(config: Arc<ServiceConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClientFactory for VisionClientFactory {
    async fn create(&self) -> Result<Arc<dyn GenerationClient>, Pdf2MdError> {
        let provider = resolve_provider(&self.config)?;
        info!("Generation client ready");
        Ok(Arc::new(VisionClient::new(provider, &self.config)))
    }
}

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Pdf2MdError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2MdError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. a pre-built `config.provider`;
/// 2. `config.provider_name` with `config.model`;
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(config: &ServiceConfig) -> Result<Arc<dyn LLMProvider>, Pdf2MdError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
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

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2MdError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}

// ── Lazy, shared client ──────────────────────────────────────────────────

/// Builds the client once, on first use, and hands out clones afterwards.
pub struct LazyClient {
    factory: Arc<dyn ClientFactory>,
    cell: OnceCell<Arc<dyn GenerationClient>>,
}

impl LazyClient {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            cell: OnceCell::new(),
        }
    }

    /// The shared client, building it if no earlier call succeeded.
    pub async fn get(&self) -> Result<Arc<dyn GenerationClient>, Pdf2MdError> {
        self.cell
            .get_or_try_init(|| self.factory.create())
            .await
            .map(Arc::clone)
    }

    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Retry parameters for one batch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retry_limit: u32,
    /// Base backoff; `0` retries immediately.
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Text accepted for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    /// Calls spent, including the successful one.
    pub attempts: u32,
}

/// Call `client` until it returns non-blank text or the policy is used up.
pub async fn generate_with_retry(
    client: &dyn GenerationClient,
    batch: &Batch,
    prompt: &str,
    images: &[ImageData],
    policy: RetryPolicy,
) -> Result<Generated, BatchError> {
    let max_attempts = policy.max_attempts();
    let mut last_err = String::from("no attempt made");

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "Batch {} (pages {}-{}): retry {}/{} after {}ms",
                batch.index,
                batch.first_page,
                batch.last_page,
                attempt,
                policy.retry_limit,
                backoff.as_millis()
            );
            if !backoff.is_zero() {
                sleep(backoff).await;
            }
        }

        match client.generate(prompt, images).await {
            Ok(text) if !text.trim().is_empty() => {
                return Ok(Generated {
                    text,
                    attempts: attempt + 1,
                });
            }
            Ok(_) => {
                warn!("Batch {}: attempt {} returned no text", batch.index, attempt + 1);
                last_err = "empty response".to_string();
            }
            Err(e) => {
                warn!("Batch {}: attempt {} failed: {}", batch.index, attempt + 1, e);
                last_err = e.to_string();
            }
        }
    }

    Err(BatchError::Exhausted {
        batch: batch.index,
        first_page: batch.first_page,
        last_page: batch.last_page,
        attempts: max_attempts,
        detail: last_err,
    })
}
