//! Configuration for the job service.
//!
//! All behaviour is controlled through [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. The config is shared read-only (`Arc`) between
//! the submission path, every worker and the generation client, so nothing
//! here changes after the service starts.
//!
//! Per-job knobs (`batch_size`, `retry_limit`) can be overridden at
//! submission time; the values here are only the defaults.

use crate::error::Pdf2MdError;
use crate::progress::ProgressCallback;
use crate::registry::REGISTRY_FILE;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a [`crate::service::JobService`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2md_jobs::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .storage_dir("/var/lib/pdf2md")
///     .workers(2)
///     .default_batch_size(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.registry_path(), std::path::Path::new("/var/lib/pdf2md/jobs.json"));
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Root of all job working directories (`<storage_dir>/<job id>/`).
    /// Default: `pdf_jobs`.
    pub storage_dir: PathBuf,

    /// Registry snapshot location. Default: `<storage_dir>/jobs.json`.
    pub registry_path: Option<PathBuf>,

    /// Number of concurrent workers. Default: 4.
    ///
    /// Each worker owns one job at a time and processes its batches strictly
    /// in order, so this is also the maximum number of in-flight VLM calls.
    pub workers: usize,

    /// Pages per generation call when the submitter does not choose. Default: 10.
    pub default_batch_size: usize,

    /// Additional attempts per batch when the submitter does not choose. Default: 2.
    pub default_retry_limit: u32,

    /// Rendering DPI. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 2000.
    ///
    /// Applied on top of `dpi` so oversized pages never exhaust memory.
    pub max_rendered_pixels: u32,

    /// Keep rendered page images in `<work_dir>/images/` after the job.
    /// Default: false (a scratch directory is removed when the job ends).
    pub keep_images: bool,

    /// Initial delay before retrying a batch, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per batch. Default: 8192.
    ///
    /// One call covers up to `batch_size` pages, so this is higher than a
    /// per-page budget would be.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Per generation call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL submissions in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// How long `shutdown` waits for each worker. Default: 5.
    pub shutdown_timeout_secs: u64,

    /// Directory containing the pdfium shared library. If None, the current
    /// directory and then the system library path are tried.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("pdf_jobs"),
            registry_path: None,
            workers: 4,
            default_batch_size: 10,
            default_retry_limit: 2,
            dpi: 200,
            max_rendered_pixels: 2000,
            keep_images: false,
            retry_backoff_ms: 500,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            system_prompt: None,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            shutdown_timeout_secs: 5,
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("storage_dir", &self.storage_dir)
            .field("registry_path", &self.registry_path)
            .field("workers", &self.workers)
            .field("default_batch_size", &self.default_batch_size)
            .field("default_retry_limit", &self.default_retry_limit)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("keep_images", &self.keep_images)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Where the registry snapshot lives.
    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| self.storage_dir.join(REGISTRY_FILE))
    }

    /// Working directory for one job.
    pub fn job_dir(&self, id: &crate::job::JobId) -> PathBuf {
        self.storage_dir.join(id.as_str())
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    pub fn registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.registry_path = Some(path.into());
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn default_batch_size(mut self, n: usize) -> Self {
        self.config.default_batch_size = n.max(1);
        self
    }

    pub fn default_retry_limit(mut self, n: u32) -> Self {
        self.config.default_retry_limit = n;
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

    pub fn keep_images(mut self, v: bool) -> Self {
        self.config.keep_images = v;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
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

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_timeout_secs = secs;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Pdf2MdError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.workers == 0 {
            return Err(Pdf2MdError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        if c.default_batch_size == 0 {
            return Err(Pdf2MdError::InvalidConfig("Batch size must be ≥ 1".into()));
        }
        if c.storage_dir.as_os_str().is_empty() {
            return Err(Pdf2MdError::InvalidConfig(
                "Storage directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
