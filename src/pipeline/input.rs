//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! ## Why download to a temp file?
//!
//! pdfium requires a file-system path — it cannot stream from a byte buffer.
//! Downloading to a `TempDir` gives us a path pdfium can open while ensuring
//! cleanup happens automatically when `ResolvedInput` is dropped, even if the
//! process panics. We sniff the document kind (PDF magic bytes vs. raster
//! image) before returning so callers get a meaningful error rather than a
//! crash deep inside the renderer.

use crate::error::HistocaseError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// What kind of document the resolved input holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// A PDF file; pages are rasterised via pdfium.
    Pdf,
    /// A standalone raster image (PNG/JPEG); decoded as a single page.
    Image,
}

/// The resolved input — either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local { path: PathBuf, kind: DocumentKind },
    /// Input was a URL; the document was downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded {
        path: PathBuf,
        kind: DocumentKind,
        _temp_dir: TempDir,
    },
}

impl ResolvedInput {
    /// Get the path to the document regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local { path, .. } => path,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            ResolvedInput::Local { kind, .. } => *kind,
            ResolvedInput::Downloaded { kind, .. } => *kind,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Classify a document from its leading bytes.
///
/// `%PDF` means PDF; PNG and JPEG magic mean a single-page image; anything
/// else is unsupported.
pub fn sniff_kind(magic: &[u8]) -> Option<DocumentKind> {
    if magic.starts_with(b"%PDF") {
        Some(DocumentKind::Pdf)
    } else if magic.starts_with(&[0x89, b'P', b'N', b'G']) || magic.starts_with(&[0xFF, 0xD8, 0xFF])
    {
        Some(DocumentKind::Image)
    } else {
        None
    }
}

/// Resolve the input string to a local document path.
///
/// If the input is a URL, download it to a temporary directory.
/// If the input is a local file, validate it exists and is readable.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
) -> Result<ResolvedInput, HistocaseError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Resolve a local file path, validating existence and document magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, HistocaseError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(HistocaseError::FileNotFound { path });
    }

    let kind = match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() {
                return Err(HistocaseError::UnsupportedDocument { path });
            }
            match sniff_kind(&magic) {
                Some(kind) => kind,
                None => return Err(HistocaseError::UnsupportedDocument { path }),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(HistocaseError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(HistocaseError::FileNotFound { path });
        }
    };

    debug!("Resolved local document: {} ({:?})", path.display(), kind);
    Ok(ResolvedInput::Local { path, kind })
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, HistocaseError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| HistocaseError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            HistocaseError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            HistocaseError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(HistocaseError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);

    let temp_dir = TempDir::new().map_err(|e| HistocaseError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| HistocaseError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let kind = match sniff_kind(&bytes) {
        Some(kind) => kind,
        None => {
            return Err(HistocaseError::UnsupportedDocument { path: file_path });
        }
    };

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| HistocaseError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {} ({:?})", file_path.display(), kind);

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        kind,
        _temp_dir: temp_dir,
    })
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/atlas.pdf"));
        assert!(is_url("http://example.com/scan.png"));
        assert!(!is_url("/tmp/atlas.pdf"));
        assert!(!is_url("atlas.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn sniff_recognises_pdf_and_images() {
        assert_eq!(sniff_kind(b"%PDF-1.7"), Some(DocumentKind::Pdf));
        assert_eq!(
            sniff_kind(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            Some(DocumentKind::Image)
        );
        assert_eq!(
            sniff_kind(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(DocumentKind::Image)
        );
        assert_eq!(sniff_kind(b"GIF8"), None);
        assert_eq!(sniff_kind(b""), None);
    }

    #[test]
    fn missing_local_file_is_an_error() {
        let result = resolve_local("/definitely/not/a/real/scan.pdf");
        assert!(matches!(result, Err(HistocaseError::FileNotFound { .. })));
    }
}
