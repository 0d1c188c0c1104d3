//! Page rasterisation: PDF pages and image files to `DynamicImage`.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering. Standalone image decode
//! goes through the same path for the same reason.
//!
//! ## Why cap pixels, not DPI?
//!
//! Scanned textbook pages vary wildly in physical size. `max_rendered_pixels`
//! caps the longest edge regardless of page dimensions, keeping memory
//! bounded and matching the image-size sweet spot for vision models
//! (around 1,024–2,048 px).

use crate::config::ExtractionConfig;
use crate::error::HistocaseError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Document facts gathered without running any extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Rasterise selected pages of a PDF into images.
///
/// This runs inside `spawn_blocking` since pdfium operations are CPU-bound.
///
/// # Returns
/// A vector of `(page_index_0based, DynamicImage)` tuples.
pub async fn render_pages(
    pdf_path: &Path,
    config: &ExtractionConfig,
    page_indices: &[usize],
) -> Result<Vec<(usize, DynamicImage)>, HistocaseError> {
    let path = pdf_path.to_path_buf();
    let max_pixels = config.max_rendered_pixels;
    let indices = page_indices.to_vec();

    tokio::task::spawn_blocking(move || render_pages_blocking(&path, max_pixels, &indices))
        .await
        .map_err(|e| HistocaseError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(
    pdf_path: &Path,
    max_pixels: u32,
    page_indices: &[usize],
) -> Result<Vec<(usize, DynamicImage)>, HistocaseError> {
    let pdfium = Pdfium::default();

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| HistocaseError::CorruptDocument {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(page_indices.len());

    for &idx in page_indices {
        if idx >= total_pages {
            warn!(
                "Skipping page {} (out of range, total={})",
                idx + 1,
                total_pages
            );
            continue;
        }

        let page = pages
            .get(idx as u16)
            .map_err(|e| HistocaseError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            HistocaseError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        results.push((idx, image));
    }

    Ok(results)
}

/// Decode a standalone image file as a single page.
///
/// A decode failure aborts the current import only; nothing already queued
/// or stored is touched.
pub async fn load_image(path: &Path) -> Result<DynamicImage, HistocaseError> {
    let p = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        image::open(&p).map_err(|e| HistocaseError::DecodeFailed {
            path: p.clone(),
            detail: e.to_string(),
        })
    })
    .await
    .map_err(|e| HistocaseError::Internal(format!("Decode task panicked: {}", e)))?
}

/// Extract document metadata from a PDF without rendering pages.
pub async fn extract_metadata(pdf_path: &Path) -> Result<DocumentMetadata, HistocaseError> {
    let path = pdf_path.to_path_buf();

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path))
        .await
        .map_err(|e| HistocaseError::Internal(format!("Metadata task panicked: {}", e)))?
}

/// Blocking implementation of metadata extraction.
fn extract_metadata_blocking(pdf_path: &Path) -> Result<DocumentMetadata, HistocaseError> {
    let pdfium = Pdfium::default();

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| HistocaseError::CorruptDocument {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

    let metadata = document.metadata();
    let pages = document.pages();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        page_count: pages.len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}
