//! Shared fakes for the job service integration tests.
//!
//! Nothing here touches pdfium or a real LLM: the rasterizer produces tiny
//! blank images, and the generation client answers from the page range in
//! the request text.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_llm::ImageData;
use edgequake_pdf2md_jobs::{
    ClientFactory, Collaborators, GenerationClient, JobId, JobProgressCallback, PageTexts,
    Pdf2MdError, Rasterizer, RenderOptions, ServiceConfig, ServiceConfigBuilder, TextExtractor,
};
use image::DynamicImage;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const POLL: Duration = Duration::from_millis(10);

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Write a file that passes the `%PDF` magic check.
pub fn write_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<<>>\nendobj\n").unwrap();
    path
}

/// Fast defaults: no backoff, two workers, ten pages per batch, two retries.
pub fn config(storage: &Path) -> ServiceConfigBuilder {
    ServiceConfig::builder()
        .storage_dir(storage)
        .workers(2)
        .default_batch_size(10)
        .default_retry_limit(2)
        .retry_backoff_ms(0)
        .shutdown_timeout_secs(5)
}

// ── Rasterizer ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Ok,
    Fail,
    Panic,
}

pub struct FakeRasterizer {
    pub pages: usize,
    pub mode: RenderMode,
    pub renders: AtomicUsize,
}

impl FakeRasterizer {
    pub fn new(pages: usize) -> Arc<Self> {
        Self::with_mode(pages, RenderMode::Ok)
    }

    pub fn with_mode(pages: usize, mode: RenderMode) -> Arc<Self> {
        Arc::new(Self {
            pages,
            mode,
            renders: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn page_count(&self, _pdf: &Path) -> Result<usize, Pdf2MdError> {
        Ok(self.pages)
    }

    async fn render(
        &self,
        pdf: &Path,
        _options: RenderOptions,
    ) -> Result<Vec<DynamicImage>, Pdf2MdError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            RenderMode::Ok => Ok((0..self.pages)
                .map(|_| DynamicImage::new_rgb8(4, 4))
                .collect()),
            RenderMode::Fail => Err(Pdf2MdError::CorruptPdf {
                path: pdf.to_path_buf(),
                detail: "xref table damaged".into(),
            }),
            RenderMode::Panic => panic!("renderer exploded"),
        }
    }
}

// ── Text extractor ───────────────────────────────────────────────────────────

pub struct FakeTextExtractor {
    pub pages: usize,
    pub fail: bool,
}

impl FakeTextExtractor {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self { pages, fail: false })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            pages: 0,
            fail: true,
        })
    }
}

#[async_trait]
impl TextExtractor for FakeTextExtractor {
    async fn extract(&self, pdf: &Path) -> Result<PageTexts, Pdf2MdError> {
        if self.fail {
            return Err(Pdf2MdError::CorruptPdf {
                path: pdf.to_path_buf(),
                detail: "no text layer".into(),
            });
        }
        Ok((1..=self.pages)
            .map(|n| (n, format!("embedded text {n}")))
            .collect())
    }
}

// ── Generation client ────────────────────────────────────────────────────────

/// Answers `## Pages A-B` for a request covering pages A..=B.
#[derive(Default)]
pub struct FakeClient {
    /// Batches (by first page) that always fail.
    pub failing: HashSet<usize>,
    /// Batches (by first page) that answer with whitespace only.
    pub blank: HashSet<usize>,
    /// Delay before every answer.
    pub delay: Option<Duration>,
    /// Answer one `## Page N` block per page, joined by a `---` line.
    pub page_breaks: bool,
    calls: Mutex<HashMap<usize, u32>>,
    prompts: Mutex<Vec<String>>,
    images: Mutex<Vec<usize>>,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(first_pages: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            failing: first_pages.iter().copied().collect(),
            ..Self::default()
        })
    }

    pub fn blank_on(first_pages: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            blank: first_pages.iter().copied().collect(),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Marks page boundaries inside a batch with `---`, the way models
    /// do when left to themselves.
    pub fn with_page_breaks() -> Arc<Self> {
        Arc::new(Self {
            page_breaks: true,
            ..Self::default()
        })
    }

    /// Calls received for the batch starting at `first_page`.
    pub fn calls_for(&self, first_page: usize) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&first_page)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Image count of every request, in call order.
    pub fn image_counts(&self) -> Vec<usize> {
        self.images.lock().unwrap().clone()
    }
}

/// Page range named in a batch request header.
pub fn requested_range(prompt: &str) -> (usize, usize) {
    let digits = |s: &str| -> usize {
        s.chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap()
    };
    if let Some(rest) = prompt.split("pages ").nth(1) {
        let first = digits(rest);
        let last = digits(rest.split('-').nth(1).unwrap());
        (first, last)
    } else {
        let n = digits(prompt.split("page ").nth(1).unwrap());
        (n, n)
    }
}

#[async_trait]
impl GenerationClient for FakeClient {
    async fn generate(&self, prompt: &str, images: &[ImageData]) -> Result<String, Pdf2MdError> {
        let (first, last) = requested_range(prompt);
        *self.calls.lock().unwrap().entry(first).or_insert(0) += 1;
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.images.lock().unwrap().push(images.len());

        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.failing.contains(&first) {
            return Err(Pdf2MdError::LlmApiError {
                message: format!("503 on pages {first}-{last}"),
            });
        }
        if self.blank.contains(&first) {
            return Ok("  \n\t ".to_string());
        }
        if self.page_breaks {
            let pages: Vec<String> = (first..=last)
                .map(|n| format!("## Page {n}\n\nBody."))
                .collect();
            return Ok(pages.join("\n\n---\n\n"));
        }
        Ok(format!("```markdown\n## Pages {first}-{last}\n\nBody.\n```"))
    }
}

pub struct FakeFactory {
    pub client: Arc<FakeClient>,
    pub fail: bool,
    pub builds: AtomicUsize,
}

impl FakeFactory {
    pub fn new(client: Arc<FakeClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            fail: false,
            builds: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            client: FakeClient::new(),
            fail: true,
            builds: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn create(&self) -> Result<Arc<dyn GenerationClient>, Pdf2MdError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Pdf2MdError::ProviderNotConfigured {
                provider: "none".into(),
                hint: "set OPENAI_API_KEY".into(),
            });
        }
        Ok(self.client.clone() as Arc<dyn GenerationClient>)
    }
}

pub fn collaborators(
    rasterizer: Arc<FakeRasterizer>,
    text: Arc<FakeTextExtractor>,
    factory: Arc<FakeFactory>,
) -> Collaborators {
    Collaborators {
        rasterizer,
        text_extractor: text,
        client_factory: factory,
    }
}

/// Healthy fakes for a document of `pages` pages.
pub fn healthy(pages: usize, client: Arc<FakeClient>) -> Collaborators {
    collaborators(
        FakeRasterizer::new(pages),
        FakeTextExtractor::new(pages),
        FakeFactory::new(client),
    )
}

// ── Progress recorder ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start { pages: usize, total: usize },
    Batch { done: usize, total: usize },
    Exhausted { batch: usize },
    Complete,
    Failed(String),
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(JobId, Event)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events_for(&self, id: &JobId) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(j, _)| j == id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn push(&self, id: &JobId, event: Event) {
        self.events.lock().unwrap().push((id.clone(), event));
    }
}

impl JobProgressCallback for Recorder {
    fn on_job_start(&self, job: &JobId, page_count: usize, batches_total: usize) {
        self.push(
            job,
            Event::Start {
                pages: page_count,
                total: batches_total,
            },
        );
    }

    fn on_batch_complete(&self, job: &JobId, done: usize, total: usize, _attempts: u32) {
        self.push(job, Event::Batch { done, total });
    }

    fn on_batch_exhausted(&self, job: &JobId, batch: usize, _total: usize, _error: &str) {
        self.push(job, Event::Exhausted { batch });
    }

    fn on_job_complete(&self, job: &JobId, _result_path: &Path) {
        self.push(job, Event::Complete);
    }

    fn on_job_failed(&self, job: &JobId, error: &str) {
        self.push(job, Event::Failed(error.to_string()));
    }
}
