//! Error types for the edgequake-pdf2md-jobs library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2MdError`]: **Fatal to a job** (unreadable PDF, provider not
//!   configured, artifact write failure) or to a service call (unknown job
//!   id, invalid submission). When it escapes the job pipeline the worker
//!   records its display text on the job and marks it `FAILED`.
//!
//! * [`BatchError`]: **Non-fatal**: one batch exhausted all of its
//!   generation attempts. The pipeline substitutes a placeholder for that
//!   batch and keeps going; the error only reaches logs and progress
//!   callbacks.

use crate::job::JobStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2md-jobs library.
#[derive(Debug, Error)]
pub enum Pdf2MdError {
    // ── Submission errors ─────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The submitted document has no bytes.
    #[error("Submitted document '{name}' is empty")]
    EmptyDocument { name: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password; password-protected uploads are not supported.
    #[error("PDF '{path}' is encrypted and requires a password.")]
    PasswordRequired { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The document opened but produced no page images.
    #[error("No pages could be rendered from '{path}'")]
    NoPagesRendered { path: PathBuf },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error for one generation call.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// A generation call exceeded the per-call timeout.
    #[error("Generation call timed out after {secs}s")]
    ApiTimeout { secs: u64 },

    // ── Job / registry errors ─────────────────────────────────────────────
    /// No job with this id exists in the registry.
    #[error("Job '{id}' not found")]
    JobNotFound { id: String },

    /// The job exists but has no artifact yet.
    #[error("Job '{id}' is {status}, result is only available once it is DONE")]
    JobNotFinished { id: String, status: JobStatus },

    /// A status change outside the job state machine was attempted.
    #[error("Job '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// The registry snapshot exists but cannot be read or parsed.
    #[error("Failed to load job registry from '{path}': {detail}")]
    RegistryLoad { path: PathBuf, detail: String },

    /// The registry snapshot could not be written. Logged, never surfaced
    /// to a job.
    #[error("Failed to persist job registry to '{path}': {source}")]
    RegistryPersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create a job's working directory or page storage.
    #[error("Failed to prepare working storage '{path}': {source}")]
    WorkDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH (or --pdfium-lib-path) to the directory holding libpdfium,\n\
or install pdfium where the system loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single batch.
///
/// The batch's section in the final document is replaced by
/// [`crate::prompts::BATCH_PLACEHOLDER`].
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum BatchError {
    /// Every attempt errored or came back empty.
    #[error("Batch {batch} (pages {first_page}-{last_page}): no usable output after {attempts} attempts: {detail}")]
    Exhausted {
        batch: usize,
        first_page: usize,
        last_page: usize,
        attempts: u32,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_finished_display_names_status() {
        let e = Pdf2MdError::JobNotFinished {
            id: "abc".into(),
            status: JobStatus::Running,
        };
        let msg = e.to_string();
        assert!(msg.contains("abc"), "got: {msg}");
        assert!(msg.contains("RUNNING"), "got: {msg}");
    }

    #[test]
    fn invalid_transition_display() {
        let e = Pdf2MdError::InvalidTransition {
            id: "j1".into(),
            from: JobStatus::Done,
            to: JobStatus::Running,
        };
        assert_eq!(e.to_string(), "Job 'j1' cannot move from DONE to RUNNING");
    }

    #[test]
    fn batch_exhausted_display() {
        let e = BatchError::Exhausted {
            batch: 2,
            first_page: 11,
            last_page: 20,
            attempts: 3,
            detail: "quota exceeded".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("pages 11-20"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("quota exceeded"));
    }

    #[test]
    fn api_timeout_display() {
        let e = Pdf2MdError::ApiTimeout { secs: 120 };
        assert!(e.to_string().contains("120s"));
    }
}
