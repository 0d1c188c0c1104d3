//! Progress-callback trait for per-chunk batch events.
//!
//! Inject an [`Arc<dyn BatchProgress>`] via
//! [`crate::config::ExtractionConfigBuilder::progress`] to receive real-time
//! events as the orchestrator works through a batch.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a terminal progress bar, a UI event loop, or a log sink
//! without the library knowing anything about how the host application
//! communicates. Chunks are processed sequentially, so the completed count
//! reported here is monotonically increasing by construction.

use std::sync::Arc;

/// Called by the batch orchestrator as it works through chunks.
///
/// Implementations must be `Send + Sync`. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait BatchProgress: Send + Sync {
    /// Called once before the first chunk, after chunking the selection.
    fn on_batch_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called as each chunk begins.
    ///
    /// # Arguments
    /// * `completed`    — chunks fully processed so far
    /// * `total_chunks` — total chunk count for this batch
    fn on_chunk_start(&self, completed: usize, total_chunks: usize) {
        let _ = (completed, total_chunks);
    }

    /// Called when a chunk's drafts have been persisted.
    ///
    /// # Arguments
    /// * `completed`    — chunks fully processed so far (including this one)
    /// * `total_chunks` — total chunk count
    /// * `drafts`       — drafts produced by this chunk (0 is a normal
    ///   outcome for pages with no diagnosable content)
    fn on_chunk_complete(&self, completed: usize, total_chunks: usize, drafts: usize) {
        let _ = (completed, total_chunks, drafts);
    }

    /// Called once if the batch aborts. Remaining chunks are abandoned;
    /// drafts persisted by completed chunks are left intact.
    fn on_batch_error(&self, message: &str) {
        let _ = message;
    }

    /// Called once after the final chunk completes successfully.
    fn on_batch_complete(&self, total_chunks: usize, drafts_total: usize) {
        let _ = (total_chunks, drafts_total);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopBatchProgress;

impl BatchProgress for NoopBatchProgress {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgress>;
