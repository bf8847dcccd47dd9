//! # edgequake-pdf2md-jobs
//!
//! A durable job queue that converts PDF documents to Markdown with Vision
//! Language Models (VLMs), a batch of pages per call.
//!
//! ## How a job flows
//!
//! ```text
//! submit ─▶ registry (PENDING, persisted) ─▶ queue
//!                                             │
//!          worker ◀────────────────────────────┘
//!            │  claim: PENDING → RUNNING (persisted)
//!            ├─ 1. Render   every page via pdfium (spawn_blocking)
//!            ├─ 2. Stage    PNG files + base64 ImageData
//!            ├─ 3. Text     embedded text layer, best-effort
//!            ├─ 4. Batches  consecutive runs of `batch_size` pages
//!            ├─ 5. VLM      one call per batch, retry, placeholder on exhaustion
//!            ├─ 6. Polish   normalise each batch's Markdown
//!            └─ 7. Output   join with `---`, write result_<id>.md → DONE
//! ```
//!
//! Every status change is written to a JSON snapshot before it becomes
//! visible. On restart, jobs that were `PENDING` or `RUNNING` are re-queued
//! and run again from page 1.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2md_jobs::{DocumentSource, JobService, ServiceConfig, SubmitRequest};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ServiceConfig::builder().storage_dir("pdf_jobs").build()?;
//!     let service = JobService::start(config).await?;
//!
//!     let request = SubmitRequest::new(DocumentSource::parse("report.pdf")).batch_size(8);
//!     let id = service.submit(request).await?;
//!     let job = service.wait_for(&id, Duration::from_millis(500)).await?;
//!     println!("{} → {}", job.status, service.read_result(&id).await?);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md-jobs` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the service in another program:
//! ```toml
//! edgequake-pdf2md-jobs = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod prompts;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod runner;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{BatchError, Pdf2MdError};
pub use job::{Job, JobId, JobStatus};
pub use pipeline::input::DocumentSource;
pub use pipeline::llm::{ClientFactory, GenerationClient};
pub use pipeline::render::{Rasterizer, RenderOptions};
pub use pipeline::text::{PageTexts, TextExtractor};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use queue::{TaskQueue, WorkItem};
pub use registry::JobRegistry;
pub use runner::{Collaborators, JobRunner};
pub use service::{JobService, SubmitRequest};
