//! Error types for the histocase library.
//!
//! One fatal error enum covers the whole pipeline. The taxonomy mirrors the
//! recovery story rather than the call site:
//!
//! * **Input/decode** — a document or image failed to resolve or parse.
//!   Aborts the current import only; nothing else is touched.
//! * **Extraction** — the vision-model call or its response failed. Aborts
//!   the remaining chunks of the current batch; drafts persisted by earlier
//!   chunks survive (partial success is a first-class outcome, surfaced via
//!   [`crate::batch::BatchOutcome::failure`]).
//! * **Storage** — a store operation failed; reported per operation.
//!
//! There is no automatic retry anywhere: every failure surfaces once and
//! recovery is operator-initiated (re-run the batch, re-import the file).

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the histocase library.
#[derive(Debug, Error)]
pub enum HistocaseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is neither a PDF nor a raster image.
    #[error("Unsupported document '{path}': expected a PDF or a PNG/JPEG image")]
    UnsupportedDocument { path: PathBuf },

    // ── Document errors ───────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("Document '{path}' is corrupt: {detail}")]
    CorruptDocument { path: PathBuf, detail: String },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A standalone image file failed to decode. Aborts the current import.
    #[error("Image failed to decode: '{path}': {detail}")]
    DecodeFailed { path: PathBuf, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The vision API returned an error for a single call.
    #[error("Vision API error: {message}")]
    ApiError { message: String },

    /// The vision-model call for a chunk failed. Remaining chunks of the
    /// batch are abandoned; drafts from completed chunks stay persisted.
    #[error("Extraction failed on chunk {chunk}: {detail}")]
    ExtractionFailed { chunk: usize, detail: String },

    /// The model responded, but its payload could not be parsed into the
    /// expected case schema.
    #[error("Could not parse extraction response: {detail}")]
    ResponseParseFailed { detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// A SQLite operation failed.
    #[error("Storage operation failed: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A stored record could not be (de)serialised.
    #[error("Record serialisation failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No draft with the given identity exists in the draft collection.
    #[error("Draft '{draft_id}' not found")]
    DraftNotFound { draft_id: String },

    /// No confirmed case with the given identity exists.
    #[error("Case '{case_id}' not found")]
    CaseNotFound { case_id: String },

    /// The draft being reviewed has no text section with the given identity.
    #[error("Section '{id}' not found on draft")]
    SectionNotFound { id: uuid::Uuid },

    /// The draft being reviewed has no image entry with the given identity.
    #[error("Image '{id}' not found on draft")]
    ImageNotFound { id: uuid::Uuid },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}
