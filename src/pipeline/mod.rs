//! Pipeline stages for page-to-case extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch the rendering backend or the extraction
//! provider) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ extract ──▶ parse ──▶ crop
//! (URL/path)  (pdfium)  (base64)  (vision LLM) (JSON)  (figures)
//! ```
//!
//! 1. [`input`]   — canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]  — rasterise selected PDF pages or decode image files; runs
//!    in `spawn_blocking` because pdfium and image decoding are CPU-bound
//! 3. [`encode`]  — PNG-encode and base64-wrap each `DynamicImage` for the
//!    multimodal API request body
//! 4. [`extract`] — drive the vision-model call; the only stage with network
//!    I/O. No automatic retry: a failed call aborts the batch's remaining
//!    chunks and recovery is operator-initiated
//! 5. [`parse`]   — tolerant JSON cleanup and decoding of the model's case
//!    payload, with lenient enumeration handling
//! 6. [`crop`]    — cut detected figure regions out of their source pages
//!    from normalised bounding boxes

pub mod crop;
pub mod encode;
pub mod extract;
pub mod input;
pub mod parse;
pub mod render;
