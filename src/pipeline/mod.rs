//! Pipeline stages used by a worker to turn one job into one Markdown file.
//!
//! Each submodule implements exactly one step. The stages that talk to the
//! outside world (pdfium, the VLM) sit behind traits so the runner can be
//! exercised with in-memory fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ batch ──▶ llm ──▶ postprocess
//!   │         (pdfium)  (PNG/b64)  (ranges)  (VLM)   (cleanup)
//!   └──▶ text (pdfium text layer, best-effort) ──────┘
//! ```
//!
//! 1. [`input`]: stage the submitted document into the job's directory
//! 2. [`render`]: rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`text`]: pull the embedded text layer to give the VLM exact strings
//! 4. [`encode`]: write page images to working storage and base64-wrap them
//! 5. [`batch`]: split the page list into consecutive batches
//! 6. [`llm`]: one VLM call per batch with retry/backoff; the only stage
//!    with network I/O besides URL downloads
//! 7. [`postprocess`]: deterministic cleanup of the VLM output

pub mod batch;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;
pub mod text;
