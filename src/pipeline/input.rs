//! Submission input: validate a document and stage it into the job directory.
//!
//! Every job owns a private copy of its document at `<work_dir>/input.pdf`,
//! whatever the submitter handed us: a local path, an HTTP(S) URL or raw
//! bytes. The copy survives restarts, which is what lets recovery re-run a
//! job from scratch without the original source.
//!
//! We check the `%PDF` magic bytes before staging so a bad upload is
//! rejected at submission with a meaningful error instead of failing later
//! inside pdfium.

use crate::error::Pdf2MdError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Where a submitted document comes from.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// A local file; it is copied, never moved.
    Path(PathBuf),
    /// An `http://` or `https://` URL, downloaded at submission.
    Url(String),
    /// An in-memory upload and the file name the client gave it.
    Bytes { data: Vec<u8>, name: String },
}

impl DocumentSource {
    /// Interpret a CLI-style argument: URLs become [`DocumentSource::Url`],
    /// anything else a path.
    pub fn parse(input: &str) -> Self {
        if is_url(input) {
            DocumentSource::Url(input.to_string())
        } else {
            DocumentSource::Path(PathBuf::from(input))
        }
    }

    /// The file name as the submitter knows it.
    pub fn original_name(&self) -> String {
        match self {
            DocumentSource::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document.pdf".to_string()),
            DocumentSource::Url(url) => filename_from_url(url),
            DocumentSource::Bytes { name, .. } => name.clone(),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Copy the document behind `source` to `dest`, creating parent directories.
///
/// # Errors
/// `FileNotFound`, `PermissionDenied`, `EmptyDocument`, `NotAPdf`,
/// `DownloadFailed` / `DownloadTimeout`, or `WorkDirFailed` when `dest`
/// cannot be written.
pub async fn stage_source(
    source: &DocumentSource,
    dest: &Path,
    download_timeout_secs: u64,
) -> Result<u64, Pdf2MdError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| Pdf2MdError::WorkDirFailed {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let write_err = |source| Pdf2MdError::WorkDirFailed {
        path: dest.to_path_buf(),
        source,
    };

    let size = match source {
        DocumentSource::Path(path) => {
            check_local(path)?;
            tokio::fs::copy(path, dest).await.map_err(write_err)?
        }
        DocumentSource::Url(url) => {
            let bytes = download(url, download_timeout_secs).await?;
            check_bytes(Path::new(url), &filename_from_url(url), &bytes)?;
            tokio::fs::write(dest, &bytes).await.map_err(write_err)?;
            bytes.len() as u64
        }
        DocumentSource::Bytes { data, name } => {
            check_bytes(Path::new(name), name, data)?;
            tokio::fs::write(dest, data).await.map_err(write_err)?;
            data.len() as u64
        }
    };

    debug!("Staged {} bytes → {}", size, dest.display());
    Ok(size)
}

/// Existence, permission, size and magic checks on a local file.
fn check_local(path: &Path) -> Result<(), Pdf2MdError> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2MdError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(Pdf2MdError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
    };
    if !path.is_file() {
        return Err(Pdf2MdError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut head = Vec::with_capacity(4);
    file.by_ref()
        .take(4)
        .read_to_end(&mut head)
        .map_err(|_| Pdf2MdError::PermissionDenied {
            path: path.to_path_buf(),
        })?;
    let name = path.display().to_string();
    check_bytes(path, &name, &head)
}

fn check_bytes(path: &Path, name: &str, bytes: &[u8]) -> Result<(), Pdf2MdError> {
    if bytes.is_empty() {
        return Err(Pdf2MdError::EmptyDocument {
            name: name.to_string(),
        });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(Pdf2MdError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

async fn download(url: &str, timeout_secs: u64) -> Result<Vec<u8>, Pdf2MdError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| Pdf2MdError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            Pdf2MdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }
    let bytes = response.bytes().await.map_err(classify)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

/// Last path segment of `url` if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

/// Turn a submitted file name into a safe display/download name.
///
/// Composes the name to NFC, drops a trailing `.pdf`, keeps letters, digits, whitespace and
/// `-_.()[]&,+`, joins words with `_`, and caps the result at 80 characters.
/// Falls back to `document` when nothing survives.
pub fn sanitize_display_name(name: &str) -> String {
    let name: String = name.trim().nfc().collect();
    let name = name.replace(['\r', '\n'], " ");
    let cut = name.len().saturating_sub(4);
    let stem = match name.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(".pdf") => &name[..cut],
        _ => name.as_str(),
    };

    let kept: String = stem
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || "-_.()[]&,+".contains(*c))
        .collect();
    let mut out = kept.split_whitespace().collect::<Vec<_>>().join("_");
    while out.contains("__") {
        out = out.replace("__", "_");
    }

    if out.is_empty() {
        return "document".to_string();
    }
    out.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn original_names() {
        assert_eq!(
            DocumentSource::parse("/data/in/Report 2024.pdf").original_name(),
            "Report 2024.pdf"
        );
        assert_eq!(
            DocumentSource::parse("https://arxiv.org/pdf/2401.00001v1.pdf").original_name(),
            "2401.00001v1.pdf"
        );
        assert_eq!(
            DocumentSource::parse("https://example.com/download").original_name(),
            "downloaded.pdf"
        );
    }

    #[test]
    fn sanitize_strips_extension_and_symbols() {
        assert_eq!(sanitize_display_name("Quarterly  Report (v2).PDF"), "Quarterly_Report_(v2)");
        assert_eq!(sanitize_display_name("a/b\\c:d*e?.pdf"), "abcde");
        assert_eq!(sanitize_display_name("회의록 3월.pdf"), "회의록_3월");
        assert_eq!(sanitize_display_name("__x__y__"), "_x_y_");
    }

    #[test]
    fn sanitize_composes_decomposed_names() {
        assert_eq!(sanitize_display_name("Cafe\u{301} menu.pdf"), "Caf\u{e9}_menu");
        assert_eq!(sanitize_display_name("\u{1112}\u{1161}\u{11AB}.pdf"), "\u{D55C}");
        assert_eq!(
            sanitize_display_name("Cafe\u{301}.pdf"),
            sanitize_display_name("Caf\u{e9}.pdf")
        );
    }

    #[test]
    fn sanitize_falls_back_and_truncates() {
        assert_eq!(sanitize_display_name("???.pdf"), "document");
        assert_eq!(sanitize_display_name(""), "document");
        assert_eq!(sanitize_display_name(&"x".repeat(200)).chars().count(), 80);
    }

    #[tokio::test]
    async fn stages_local_pdf() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("in.pdf");
        std::fs::write(&src, b"%PDF-1.7\n...").unwrap();
        let dest = dir.path().join("job").join("input.pdf");

        let size = stage_source(&DocumentSource::Path(src), &dest, 5).await.unwrap();
        assert_eq!(size, 12);
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.7\n...");
    }

    #[tokio::test]
    async fn rejects_missing_empty_and_non_pdf() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input.pdf");

        let missing = DocumentSource::Path(dir.path().join("nope.pdf"));
        assert!(matches!(
            stage_source(&missing, &dest, 5).await,
            Err(Pdf2MdError::FileNotFound { .. })
        ));

        let empty = DocumentSource::Bytes { data: vec![], name: "e.pdf".into() };
        assert!(matches!(
            stage_source(&empty, &dest, 5).await,
            Err(Pdf2MdError::EmptyDocument { .. })
        ));

        let png = DocumentSource::Bytes { data: b"\x89PNG\r\n".to_vec(), name: "x.pdf".into() };
        match stage_source(&png, &dest, 5).await {
            Err(Pdf2MdError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"\x89PNG"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn directory_is_not_a_document() {
        let dir = TempDir::new().unwrap();
        let err = stage_source(
            &DocumentSource::Path(dir.path().to_path_buf()),
            &dir.path().join("out.pdf"),
            5,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Pdf2MdError::FileNotFound { .. }));
    }
}
