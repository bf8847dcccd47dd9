//! Best-effort extraction of the PDF text layer.
//!
//! Scanned documents have no text layer and born-digital ones sometimes
//! have a garbled one, so this stage never fails a job: the runner treats
//! any error as "no text for any page" and the VLM works from the images.

use crate::error::Pdf2MdError;
use crate::pipeline::render::{bind_pdfium, open_document};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-page embedded text, keyed by 1-based page number.
pub type PageTexts = BTreeMap<usize, String>;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Text of every page that has some. Missing keys mean "no text".
    async fn extract(&self, pdf: &Path) -> Result<PageTexts, Pdf2MdError>;
}

/// [`TextExtractor`] reading pdfium's page text objects.
#[derive(Debug, Clone, Default)]
pub struct PdfiumTextExtractor {
    lib_dir: Option<PathBuf>,
}

impl PdfiumTextExtractor {
    pub fn new(lib_dir: Option<PathBuf>) -> Self {
        Self { lib_dir }
    }
}

#[async_trait]
impl TextExtractor for PdfiumTextExtractor {
    async fn extract(&self, pdf: &Path) -> Result<PageTexts, Pdf2MdError> {
        let path = pdf.to_path_buf();
        let lib_dir = self.lib_dir.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium(lib_dir.as_deref())?;
            let document = open_document(&pdfium, &path)?;
            let mut texts = PageTexts::new();
            for (idx, page) in document.pages().iter().enumerate() {
                let text = page
                    .text()
                    .map_err(|e| Pdf2MdError::CorruptPdf {
                        path: path.clone(),
                        detail: format!("text layer of page {}: {:?}", idx + 1, e),
                    })?
                    .all();
                if !text.trim().is_empty() {
                    texts.insert(idx + 1, text);
                }
            }
            debug!("Extracted text for {} pages", texts.len());
            Ok(texts)
        })
        .await
        .map_err(|e| Pdf2MdError::Internal(format!("Text task panicked: {}", e)))?
    }
}

/// `(page, text)` pairs for `pages`, with `""` where nothing was extracted.
pub fn texts_for(texts: &PageTexts, pages: std::ops::RangeInclusive<usize>) -> Vec<(usize, &str)> {
    pages
        .map(|p| (p, texts.get(&p).map(String::as_str).unwrap_or("")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pages_map_to_empty_text() {
        let mut texts = PageTexts::new();
        texts.insert(2, "second".to_string());
        assert_eq!(texts_for(&texts, 1..=3), vec![(1, ""), (2, "second"), (3, "")]);
    }
}
