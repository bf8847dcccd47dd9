//! The per-job pipeline a worker runs for one claimed job.
//!
//! ```text
//! client ─▶ started_at ─▶ render ─▶ stage images ─▶ text layer
//!        ─▶ partition ─▶ for each batch: request ─▶ retry ─▶ normalise ─▶ count
//!        ─▶ join ─▶ write result_<id>.md ─▶ DONE
//! ```
//!
//! Batches run strictly in order on the owning worker, so the output sections
//! are in page order without any reordering step.
//!
//! Only rendering, client construction, image staging and the artifact write
//! can fail a job. Text extraction errors are logged and ignored, and a batch
//! that exhausts its attempts is replaced by [`BATCH_PLACEHOLDER`].

use crate::config::ServiceConfig;
use crate::error::Pdf2MdError;
use crate::job::{Job, JobId};
use crate::pipeline::batch::{partition, Batch};
use crate::pipeline::encode::{stage_pages, EncodedPage, PageStore};
use crate::pipeline::llm::{
    generate_with_retry, ClientFactory, GenerationClient, LazyClient, RetryPolicy,
    VisionClientFactory,
};
use crate::pipeline::postprocess::normalize_batch_output;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer, RenderOptions};
use crate::pipeline::text::{texts_for, PageTexts, PdfiumTextExtractor, TextExtractor};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts::{batch_request, BATCH_PLACEHOLDER, SECTION_SEPARATOR};
use crate::registry::JobRegistry;
use edgequake_llm::ImageData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The external systems a runner depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub rasterizer: Arc<dyn Rasterizer>,
    pub text_extractor: Arc<dyn TextExtractor>,
    pub client_factory: Arc<dyn ClientFactory>,
}

impl Collaborators {
    /// pdfium for rendering and text, `edgequake-llm` for generation.
    pub fn production(config: Arc<ServiceConfig>) -> Self {
        let lib_dir = config.pdfium_lib_path.clone();
        Self {
            rasterizer: Arc::new(PdfiumRasterizer::new(lib_dir.clone())),
            text_extractor: Arc::new(PdfiumTextExtractor::new(lib_dir)),
            client_factory: Arc::new(VisionClientFactory::new(config)),
        }
    }
}

/// Executes the pipeline for jobs that a worker has claimed.
pub struct JobRunner {
    config: Arc<ServiceConfig>,
    registry: Arc<JobRegistry>,
    rasterizer: Arc<dyn Rasterizer>,
    text_extractor: Arc<dyn TextExtractor>,
    client: LazyClient,
    progress: ProgressCallback,
}

impl JobRunner {
    pub fn new(
        config: Arc<ServiceConfig>,
        registry: Arc<JobRegistry>,
        collaborators: Collaborators,
    ) -> Self {
        let progress = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        Self {
            rasterizer: collaborators.rasterizer,
            text_extractor: collaborators.text_extractor,
            client: LazyClient::new(collaborators.client_factory),
            config,
            registry,
            progress,
        }
    }

    /// Run the whole pipeline for a `RUNNING` job and mark it `DONE`.
    ///
    /// Returns the artifact path. On `Err` the job is still `RUNNING`; the
    /// caller records the failure with [`fail`](Self::fail).
    pub async fn run(&self, job: &Job) -> Result<PathBuf, Pdf2MdError> {
        let id = &job.id;
        let job_start = Instant::now();

        let client = self.client.get().await?;
        self.registry.update(id, Job::mark_started).await?;

        let store = PageStore::create(&job.work_dir, self.config.keep_images)?;
        let pages = self.render(job, &store).await?;
        let texts = self.extract_text(job).await;

        let batches = partition(pages.len(), job.batch_size);
        let total = batches.len();
        let page_count = pages.len();
        self.registry
            .update(id, |j| {
                j.page_count = Some(page_count);
                j.batches_total = Some(total);
            })
            .await?;
        self.progress.on_job_start(id, page_count, total);
        info!(
            job_id = %id,
            "{} pages in {} batches of up to {}",
            page_count, total, job.batch_size
        );

        let policy = RetryPolicy {
            retry_limit: job.retry_limit,
            backoff_ms: self.config.retry_backoff_ms,
        };
        let mut sections = Vec::with_capacity(total);
        for batch in &batches {
            let section = self
                .run_batch(id, client.as_ref(), batch, total, &pages, &texts, policy)
                .await?;
            sections.push(section);
        }

        let result_path = job.work_dir.join(format!("result_{}.md", id));
        let document = format!("{}\n", sections.join(SECTION_SEPARATOR));
        write_atomic(&result_path, &document).await?;

        let done_path = result_path.clone();
        self.registry
            .try_update(id, move |j| j.mark_done(done_path))
            .await?;
        self.progress.on_job_complete(id, &result_path);

        if store.is_scratch() {
            debug!(job_id = %id, "Removing scratch images {}", store.dir().display());
        }
        drop(store);

        info!(
            job_id = %id,
            "Job DONE in {:?} → {}",
            job_start.elapsed(),
            result_path.display()
        );
        Ok(result_path)
    }

    /// `RUNNING → FAILED` with `message`, persisted.
    pub async fn fail(&self, id: &JobId, message: &str) {
        warn!(job_id = %id, "Job FAILED: {}", message);
        let text = message.to_string();
        if let Err(e) = self.registry.try_update(id, move |j| j.mark_failed(text)).await {
            warn!(job_id = %id, "Could not record failure: {}", e);
            return;
        }
        self.progress.on_job_failed(id, message);
    }

    async fn render(&self, job: &Job, store: &PageStore) -> Result<Vec<EncodedPage>, Pdf2MdError> {
        let options = RenderOptions {
            dpi: self.config.dpi,
            max_pixels: self.config.max_rendered_pixels,
        };
        let started = Instant::now();
        let images = self.rasterizer.render(&job.source_path, options).await?;
        if images.is_empty() {
            return Err(Pdf2MdError::NoPagesRendered {
                path: job.source_path.clone(),
            });
        }
        let pages = stage_pages(store, images).await?;
        info!(
            job_id = %job.id,
            "Rendered {} pages in {}ms",
            pages.len(),
            started.elapsed().as_millis()
        );
        Ok(pages)
    }

    async fn extract_text(&self, job: &Job) -> PageTexts {
        match self.text_extractor.extract(&job.source_path).await {
            Ok(texts) => texts,
            Err(e) => {
                warn!(job_id = %job.id, "Text extraction failed, continuing without it: {}", e);
                PageTexts::new()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &self,
        id: &JobId,
        client: &dyn GenerationClient,
        batch: &Batch,
        total: usize,
        pages: &[EncodedPage],
        texts: &PageTexts,
        policy: RetryPolicy,
    ) -> Result<String, Pdf2MdError> {
        let started = Instant::now();
        let prompt = batch_request(
            batch.first_page,
            batch.last_page,
            &texts_for(texts, batch.pages()),
        );
        let images: Vec<ImageData> = pages[batch.span()].iter().map(|p| p.image.clone()).collect();

        let (section, attempts) =
            match generate_with_retry(client, batch, &prompt, &images, policy).await {
                Ok(generated) => {
                    let cleaned = normalize_batch_output(&generated.text);
                    if cleaned.is_empty() {
                        warn!(job_id = %id, "Batch {} normalised to nothing", batch.index);
                        (BATCH_PLACEHOLDER.to_string(), generated.attempts)
                    } else {
                        (cleaned, generated.attempts)
                    }
                }
                Err(e) => {
                    warn!(job_id = %id, "{}", e);
                    self.progress
                        .on_batch_exhausted(id, batch.index, total, &e.to_string());
                    (BATCH_PLACEHOLDER.to_string(), policy.max_attempts())
                }
            };

        let done = self
            .registry
            .update(id, |j| {
                j.record_batch(total);
                j.batches_done
            })
            .await?;
        self.progress.on_batch_complete(id, done, total, attempts);
        info!(
            job_id = %id,
            "Batch {}/{} (pages {}-{}) in {}ms, {} attempt(s)",
            batch.index,
            total,
            batch.first_page,
            batch.last_page,
            started.elapsed().as_millis(),
            attempts
        );
        Ok(section)
    }
}

/// Write to a temp sibling, then rename, so a reader never sees half a file.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), Pdf2MdError> {
    let wrap = |source| Pdf2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(wrap)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(wrap)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result_x.md");
        write_atomic(&path, "# a\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# a\n");
        assert!(!path.with_extension("md.tmp").exists());
    }

    #[tokio::test]
    async fn atomic_write_into_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone").join("result_x.md");
        let err = write_atomic(&path, "x").await.unwrap_err();
        assert!(matches!(err, Pdf2MdError::OutputWriteFailed { .. }));
    }
}
