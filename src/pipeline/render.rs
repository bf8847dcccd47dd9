//! PDF rasterisation: every page of a document to a `DynamicImage`.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to call from async contexts. The work moves to the
//! blocking pool so runtime threads keep serving the queue and the registry.
//!
//! ## DPI and the pixel cap
//!
//! Pages are rendered at `dpi`, but the longest edge never exceeds
//! `max_pixels`: an A0 poster at 200 DPI would otherwise be a
//! 6,600 × 9,300 px bitmap, and a batch holds up to `batch_size` of them.

use crate::error::Pdf2MdError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Rendering parameters shared by every job of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub dpi: u32,
    pub max_pixels: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_pixels: 2000,
        }
    }
}

/// Turns a document into ordered page images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Number of pages, without rendering anything.
    async fn page_count(&self, pdf: &Path) -> Result<usize, Pdf2MdError>;

    /// Render every page in document order. Fails as a whole: a document
    /// with one unrenderable page yields an error, not a shorter list.
    async fn render(
        &self,
        pdf: &Path,
        options: RenderOptions,
    ) -> Result<Vec<DynamicImage>, Pdf2MdError>;
}

/// [`Rasterizer`] backed by a pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    lib_dir: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// `lib_dir` is the directory holding `libpdfium`; `None` tries the
    /// `PDFIUM_LIB_PATH` variable, the current directory, then the system
    /// loader.
    pub fn new(lib_dir: Option<PathBuf>) -> Self {
        Self { lib_dir }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn page_count(&self, pdf: &Path) -> Result<usize, Pdf2MdError> {
        let path = pdf.to_path_buf();
        let lib_dir = self.lib_dir.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium(lib_dir.as_deref())?;
            let document = open_document(&pdfium, &path)?;
            Ok(document.pages().len() as usize)
        })
        .await
        .map_err(|e| Pdf2MdError::Internal(format!("Page-count task panicked: {}", e)))?
    }

    async fn render(
        &self,
        pdf: &Path,
        options: RenderOptions,
    ) -> Result<Vec<DynamicImage>, Pdf2MdError> {
        let path = pdf.to_path_buf();
        let lib_dir = self.lib_dir.clone();
        tokio::task::spawn_blocking(move || render_blocking(lib_dir.as_deref(), &path, options))
            .await
            .map_err(|e| Pdf2MdError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn render_blocking(
    lib_dir: Option<&Path>,
    pdf_path: &Path,
    options: RenderOptions,
) -> Result<Vec<DynamicImage>, Pdf2MdError> {
    let pdfium = bind_pdfium(lib_dir)?;
    let document = open_document(&pdfium, pdf_path)?;
    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages", total);

    let mut images = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        let width = target_width(page.width().value, options);
        let config = PdfRenderConfig::new()
            .set_target_width(width)
            .set_maximum_height(options.max_pixels as i32);

        let bitmap =
            page.render_with_config(&config)
                .map_err(|e| Pdf2MdError::RasterisationFailed {
                    page: page_num,
                    detail: format!("{:?}", e),
                })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    if images.is_empty() {
        warn!("{} has no pages", pdf_path.display());
    }
    Ok(images)
}

/// Width in pixels for a page `width_pt` points wide.
fn target_width(width_pt: f32, options: RenderOptions) -> i32 {
    let at_dpi = (width_pt * options.dpi as f32 / 72.0).round() as i32;
    at_dpi.clamp(1, options.max_pixels as i32)
}

/// Bind to pdfium.
///
/// Lookup order: `lib_dir`, `PDFIUM_LIB_PATH`, the current directory, then
/// the system library path.
pub(crate) fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, Pdf2MdError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = lib_dir {
        candidates.push(dir.to_path_buf());
    }
    if let Ok(dir) = std::env::var("PDFIUM_LIB_PATH") {
        if !dir.is_empty() {
            candidates.push(PathBuf::from(dir));
        }
    }
    candidates.push(PathBuf::from("./"));

    let mut tried = Vec::new();
    for dir in candidates {
        // PDFIUM_LIB_PATH may name the library file itself.
        let lib = if dir.is_file() {
            dir.clone()
        } else {
            Pdfium::pdfium_platform_library_name_at_path(&dir)
        };
        match Pdfium::bind_to_library(&lib) {
            Ok(bindings) => {
                debug!("Bound pdfium from {}", lib.display());
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => tried.push(format!("{}: {}", lib.display(), e)),
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| {
            tried.push(format!("system library: {}", e));
            Pdf2MdError::PdfiumBindingFailed(tried.join("; "))
        })
}

/// Open `path`, classifying pdfium's load error.
pub(crate) fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
) -> Result<PdfDocument<'a>, Pdf2MdError> {
    pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.to_lowercase().contains("password") {
            Pdf2MdError::PasswordRequired {
                path: path.to_path_buf(),
            }
        } else {
            Pdf2MdError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    })
}
