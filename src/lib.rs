//! # histocase
//!
//! Extract structured pathology case records from scanned textbook pages
//! using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Pathology teaching atlases pack each case into a dense page of prose and
//! microscopy figures. Plain OCR flattens them into word soup — figure
//! captions merge into body text, the stain and magnification are lost, and
//! nothing links a micrograph to the case it illustrates. Instead this crate
//! rasterises each page and lets a VLM read it as a pathologist would,
//! returning typed case records (text sections + located figure regions)
//! that a human reviews, corrects, and confirms into durable storage.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document (PDF / image / URL)
//!  │
//!  ├─ 1. Import   resolve input, rasterise pages into a selection queue
//!  ├─ 2. Batch    fixed-size chunks, one sequential VLM call per chunk
//!  ├─ 3. Crop     figure regions cut from pages via normalised boxes
//!  ├─ 4. Draft    records persisted immediately, chunk by chunk
//!  ├─ 5. Review   write-through field edits, then confirm
//!  └─ 6. Export   training-data JSON projection
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use histocase::{import, run_batch, CaseStore, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let store = CaseStore::open("cases.db")?;
//!     let mut queue = import("atlas_chapter7.pdf", &config).await?;
//!     let outcome = run_batch(&mut queue, &store, &config).await?;
//!     println!(
//!         "{} drafts from {}/{} chunks",
//!         outcome.drafts.len(),
//!         outcome.stats.completed_chunks,
//!         outcome.stats.total_chunks
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `histocase` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! histocase = { version = "0.3", default-features = false }
//! ```
//!
//! ## Failure model
//!
//! Chunks are extracted strictly sequentially; any failure abandons the
//! remaining chunks but keeps every draft already persisted — partial
//! success is an expected outcome, not an error. There is no automatic
//! retry anywhere: recovery is always operator-initiated.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod queue;
pub mod review;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{run_batch, BatchFailure, BatchOutcome, BatchStats};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection};
pub use error::HistocaseError;
pub use export::{to_json, training_record, TrainingRecord};
pub use model::{
    CaseRecord, ConfirmedCase, DiagnosticBasis, DraftCase, ImageEntry, Magnification,
    SectionLabel, StainType, TextSection,
};
pub use pipeline::crop::{crop_region, BoundingBox};
pub use pipeline::extract::{CaseExtractor, ExtractUsage, VisionExtractor};
pub use pipeline::render::DocumentMetadata;
pub use progress::{BatchProgress, NoopBatchProgress, ProgressCallback};
pub use queue::{import, inspect, PageQueue, QueuedPage};
pub use review::ReviewSession;
pub use store::{CaseStore, HistoryEntry, Provenance};
