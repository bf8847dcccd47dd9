//! Page image storage and encoding for the VLM request body.
//!
//! Rendered pages are written as `page_N.png` (1-based) into working storage
//! and base64-wrapped in an [`ImageData`]. PNG is lossless, which matters
//! more than size for text crispness; `detail: "high"` lets OpenAI-class
//! models use their full tile budget on fine print.
//!
//! Working storage is either `<work_dir>/images/`, kept after the job, or a
//! scratch [`TempDir`] inside `<work_dir>` that disappears when the
//! [`PageStore`] is dropped.

use crate::error::Pdf2MdError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Where a job's page images live while it runs.
#[derive(Debug)]
pub enum PageStore {
    /// `<work_dir>/images/`, left in place for inspection.
    Kept(PathBuf),
    /// Removed on drop.
    Scratch(TempDir),
}

impl PageStore {
    /// Create the image directory for a job.
    pub fn create(work_dir: &Path, keep_images: bool) -> Result<Self, Pdf2MdError> {
        let wrap = |source| Pdf2MdError::WorkDirFailed {
            path: work_dir.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(work_dir).map_err(wrap)?;
        if keep_images {
            let dir = work_dir.join("images");
            std::fs::create_dir_all(&dir).map_err(wrap)?;
            Ok(PageStore::Kept(dir))
        } else {
            let dir = tempfile::Builder::new()
                .prefix("pages_")
                .tempdir_in(work_dir)
                .map_err(wrap)?;
            Ok(PageStore::Scratch(dir))
        }
    }

    pub fn dir(&self) -> &Path {
        match self {
            PageStore::Kept(dir) => dir,
            PageStore::Scratch(dir) => dir.path(),
        }
    }

    /// Path of the image for 1-based `page`.
    pub fn page_path(&self, page: usize) -> PathBuf {
        self.dir().join(format!("page_{page}.png"))
    }

    pub fn is_scratch(&self) -> bool {
        matches!(self, PageStore::Scratch(_))
    }
}

/// One page ready to be attached to a generation request.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    /// 1-based page number.
    pub page: usize,
    pub path: PathBuf,
    pub image: ImageData,
}

/// PNG-encode `img` and wrap it for the VLM API.
pub fn encode_png(img: &DynamicImage) -> Result<(Vec<u8>, ImageData), image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    let data = ImageData::new(b64, "image/png").with_detail("high");
    Ok((buf, data))
}

/// Write every page to `store` and encode it, preserving page order.
///
/// Runs on the blocking pool: PNG compression of a few dozen 2000 px pages
/// is long enough to stall a runtime worker thread.
///
/// # Errors
/// Any page that cannot be encoded or written fails the whole call, so page
/// numbers stay aligned with the document.
pub async fn stage_pages(
    store: &PageStore,
    pages: Vec<DynamicImage>,
) -> Result<Vec<EncodedPage>, Pdf2MdError> {
    let dir = store.dir().to_path_buf();
    tokio::task::spawn_blocking(move || {
        pages
            .iter()
            .enumerate()
            .map(|(idx, img)| stage_one(&dir, idx + 1, img))
            .collect()
    })
    .await
    .map_err(|e| Pdf2MdError::Internal(format!("Encode task panicked: {}", e)))?
}

fn stage_one(dir: &Path, page: usize, img: &DynamicImage) -> Result<EncodedPage, Pdf2MdError> {
    let (png, image) = encode_png(img).map_err(|e| Pdf2MdError::RasterisationFailed {
        page,
        detail: format!("Image encoding failed: {}", e),
    })?;
    let path = dir.join(format!("page_{page}.png"));
    std::fs::write(&path, &png).map_err(|source| Pdf2MdError::OutputWriteFailed {
        path: path.clone(),
        source,
    })?;
    debug!("Staged page {} → {} ({} bytes)", page, path.display(), png.len());
    Ok(EncodedPage { page, path, image })
}
