//! Page queue: imported pages awaiting extraction.
//!
//! A [`PageQueue`] is transient: it exists between import and the batch run
//! that consumes it, and is cleared only when a batch completes in full. Each page carries a user-toggleable `selected` flag so the operator
//! can extract a subset of an imported document without re-importing.

use crate::config::ExtractionConfig;
use crate::error::HistocaseError;
use crate::pipeline::input::{self, DocumentKind};
use crate::pipeline::render::{self, DocumentMetadata};
use image::DynamicImage;
use tracing::info;
use uuid::Uuid;

/// An imported page awaiting extraction.
#[derive(Debug, Clone)]
pub struct QueuedPage {
    pub id: Uuid,
    /// 1-indexed page number within the source document.
    pub page_num: usize,
    /// Source document filename, carried into figure filenames.
    pub source: String,
    pub image: DynamicImage,
    pub selected: bool,
}

/// Ordered collection of imported pages.
#[derive(Debug, Default)]
pub struct PageQueue {
    pages: Vec<QueuedPage>,
}

impl PageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, page: QueuedPage) {
        self.pages.push(page);
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> &[QueuedPage] {
        &self.pages
    }

    /// Flip one page's selection flag. Returns the new state, or None for an
    /// out-of-range index.
    pub fn toggle(&mut self, index: usize) -> Option<bool> {
        let page = self.pages.get_mut(index)?;
        page.selected = !page.selected;
        Some(page.selected)
    }

    pub fn set_selected(&mut self, index: usize, selected: bool) -> bool {
        match self.pages.get_mut(index) {
            Some(page) => {
                page.selected = selected;
                true
            }
            None => false,
        }
    }

    pub fn select_all(&mut self) {
        for page in &mut self.pages {
            page.selected = true;
        }
    }

    pub fn deselect_all(&mut self) {
        for page in &mut self.pages {
            page.selected = false;
        }
    }

    /// Selected pages in original import order.
    pub fn selected(&self) -> Vec<&QueuedPage> {
        self.pages.iter().filter(|p| p.selected).collect()
    }

    /// Discard every page. Called by the orchestrator once a batch has
    /// consumed the queue in full; never called on a partial run.
    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

/// Import a document (PDF or single image, local path or URL) into a queue.
///
/// All pages arrive selected. A decode or rasterisation failure aborts this
/// import only — nothing already queued elsewhere or stored is touched.
pub async fn import(
    input_str: &str,
    config: &ExtractionConfig,
) -> Result<PageQueue, HistocaseError> {
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let path = resolved.path().to_path_buf();
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| input_str.to_string());

    let mut queue = PageQueue::new();

    match resolved.kind() {
        DocumentKind::Pdf => {
            let metadata = render::extract_metadata(&path).await?;
            let indices = config.pages.to_indices(metadata.page_count);
            if indices.is_empty() {
                return Err(HistocaseError::PageOutOfRange {
                    page: 0,
                    total: metadata.page_count,
                });
            }
            let rendered = render::render_pages(&path, config, &indices).await?;
            for (idx, image) in rendered {
                queue.push(QueuedPage {
                    id: Uuid::new_v4(),
                    page_num: idx + 1,
                    source: source.clone(),
                    image,
                    selected: true,
                });
            }
        }
        DocumentKind::Image => {
            let image = render::load_image(&path).await?;
            queue.push(QueuedPage {
                id: Uuid::new_v4(),
                page_num: 1,
                source,
                image,
                selected: true,
            });
        }
    }

    info!("Imported {} pages from {}", queue.len(), input_str);
    Ok(queue)
}

/// Extract document metadata without rendering or extraction.
///
/// Does not require a vision provider or API key.
pub async fn inspect(input_str: &str) -> Result<DocumentMetadata, HistocaseError> {
    let resolved = input::resolve_input(input_str, 120).await?;
    match resolved.kind() {
        DocumentKind::Pdf => render::extract_metadata(resolved.path()).await,
        DocumentKind::Image => Ok(DocumentMetadata {
            title: None,
            author: None,
            page_count: 1,
            pdf_version: String::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn page(n: usize) -> QueuedPage {
        QueuedPage {
            id: Uuid::new_v4(),
            page_num: n,
            source: "atlas.pdf".into(),
            image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                8,
                8,
                Rgba([255, 255, 255, 255]),
            )),
            selected: true,
        }
    }

    #[test]
    fn toggle_flips_selection() {
        let mut queue = PageQueue::new();
        queue.push(page(1));
        assert_eq!(queue.toggle(0), Some(false));
        assert_eq!(queue.toggle(0), Some(true));
        assert_eq!(queue.toggle(5), None);
    }

    #[test]
    fn selected_preserves_import_order() {
        let mut queue = PageQueue::new();
        for n in 1..=4 {
            queue.push(page(n));
        }
        queue.set_selected(1, false);
        let selected: Vec<usize> = queue.selected().iter().map(|p| p.page_num).collect();
        assert_eq!(selected, vec![1, 3, 4]);
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut queue = PageQueue::new();
        queue.push(page(1));
        queue.clear();
        assert!(queue.is_empty());
    }
}
