//! Batch orchestrator: selected pages → persisted draft records.
//!
//! ## Why sequential chunks?
//!
//! The selection is partitioned into fixed-size chunks (default 2, see
//! [`crate::config::ExtractionConfig::chunk_size`]) and the chunks are
//! processed strictly one at a time. Throughput is intentionally capped, not
//! maximised: sequential calls bound the concurrent load on the extraction
//! service and keep the progress counter monotonically increasing. Figure
//! crops *within* a completed chunk are independent and side-effect-free, so
//! those do run concurrently — but all of them complete before the chunk's
//! drafts are persisted.
//!
//! ## Partial success is first-class
//!
//! Every draft is persisted the moment its chunk finishes, so a later
//! chunk's failure (or a process crash) never loses completed work. On any
//! error the remaining chunks are abandoned, a single generic failure lands
//! in [`BatchOutcome::failure`], and nothing is rolled back. The page queue
//! is cleared only when the whole batch completes.

use crate::config::ExtractionConfig;
use crate::error::HistocaseError;
use crate::model::{CaseRecord, DraftCase, ImageEntry, TextSection};
use crate::pipeline::crop::crop_region;
use crate::pipeline::encode;
use crate::pipeline::extract::{CaseExtractor, VisionExtractor};
use crate::pipeline::parse::ParsedCase;
use crate::queue::PageQueue;
use crate::store::CaseStore;
use chrono::Utc;
use edgequake_llm::ImageData;
use futures::future::join_all;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Counters describing one batch run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BatchStats {
    pub selected_pages: usize,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub drafts_created: usize,
    pub regions_cropped: usize,
    pub regions_dropped: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_duration_ms: u64,
    pub extract_duration_ms: u64,
}

/// The single generic failure surfaced when a batch aborts early.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchFailure {
    /// 1-indexed chunk that failed.
    pub chunk: usize,
    pub message: String,
}

/// Result of a batch run, including partial results when a chunk failed.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Drafts created and persisted, in chunk order.
    pub drafts: Vec<DraftCase>,
    pub stats: BatchStats,
    /// Set when the run aborted before the final chunk; drafts from
    /// completed chunks are already persisted regardless.
    pub failure: Option<BatchFailure>,
}

impl BatchOutcome {
    /// Treat any mid-batch failure as a hard error.
    pub fn into_result(self) -> Result<BatchOutcome, HistocaseError> {
        match self.failure {
            Some(ref failure) => Err(HistocaseError::ExtractionFailed {
                chunk: failure.chunk,
                detail: failure.message.clone(),
            }),
            None => Ok(self),
        }
    }
}

/// A page captured for one chunk. Images are shared, not copied, so the
/// concurrent crop tasks can borrow across `spawn_blocking` boundaries.
#[derive(Clone)]
struct ChunkPage {
    page_num: usize,
    source: String,
    image: Arc<DynamicImage>,
}

/// Run batch extraction over the queue's selected pages.
///
/// Implements the orchestration contract end to end: filter → chunk →
/// sequential extract → concurrent crop → synthesise → persist-immediately.
/// Returns `Err` only when the run cannot start at all (no provider
/// configured); everything after the first chunk starts is reported through
/// [`BatchOutcome::failure`] instead, because by then partial results exist.
pub async fn run_batch(
    queue: &mut PageQueue,
    store: &CaseStore,
    config: &ExtractionConfig,
) -> Result<BatchOutcome, HistocaseError> {
    let total_start = Instant::now();

    // ── Step 1: Filter to selected pages ─────────────────────────────────
    let selected: Vec<ChunkPage> = queue
        .selected()
        .into_iter()
        .map(|p| ChunkPage {
            page_num: p.page_num,
            source: p.source.clone(),
            image: Arc::new(p.image.clone()),
        })
        .collect();

    if selected.is_empty() {
        debug!("No pages selected; batch is a no-op");
        return Ok(BatchOutcome {
            drafts: Vec::new(),
            stats: BatchStats::default(),
            failure: None,
        });
    }

    // ── Step 2: Resolve the extractor ────────────────────────────────────
    let extractor: Arc<dyn CaseExtractor> = match config.extractor {
        Some(ref extractor) => Arc::clone(extractor),
        None => Arc::new(VisionExtractor::from_config(config)?),
    };

    // ── Step 3: Partition into chunks, preserving selection order ────────
    let chunks: Vec<Vec<ChunkPage>> = selected
        .chunks(config.chunk_size)
        .map(|c| c.to_vec())
        .collect();
    let total_chunks = chunks.len();
    info!(
        "Starting batch: {} pages in {} chunks of ≤{}",
        selected.len(),
        total_chunks,
        config.chunk_size
    );

    let mut stats = BatchStats {
        selected_pages: selected.len(),
        total_chunks,
        ..BatchStats::default()
    };
    let mut drafts: Vec<DraftCase> = Vec::new();
    let mut failure: Option<BatchFailure> = None;

    if let Some(ref cb) = config.progress {
        cb.on_batch_start(total_chunks);
    }

    // ── Step 4: Sequential chunk loop ────────────────────────────────────
    for (chunk_idx, chunk) in chunks.into_iter().enumerate() {
        let chunk_num = chunk_idx + 1;
        if let Some(ref cb) = config.progress {
            cb.on_chunk_start(stats.completed_chunks, total_chunks);
        }

        match process_chunk(&extractor, &chunk, store, config, &mut stats).await {
            Ok(chunk_drafts) => {
                stats.completed_chunks += 1;
                let produced = chunk_drafts.len();
                drafts.extend(chunk_drafts);
                if let Some(ref cb) = config.progress {
                    cb.on_chunk_complete(stats.completed_chunks, total_chunks, produced);
                }
            }
            Err(e) => {
                // Abort remaining chunks; drafts persisted so far stay put.
                warn!("Batch aborted on chunk {}: {}", chunk_num, e);
                let f = BatchFailure {
                    chunk: chunk_num,
                    message: format!("Extraction failed — {} drafts were kept", drafts.len()),
                };
                if let Some(ref cb) = config.progress {
                    cb.on_batch_error(&f.message);
                }
                failure = Some(f);
                break;
            }
        }
    }

    stats.drafts_created = drafts.len();
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    // ── Step 5: Consume the queue only on full completion ────────────────
    if failure.is_none() {
        queue.clear();
        if let Some(ref cb) = config.progress {
            cb.on_batch_complete(total_chunks, drafts.len());
        }
        info!(
            "Batch complete: {} drafts from {} chunks in {}ms",
            drafts.len(),
            total_chunks,
            stats.total_duration_ms
        );
    }

    Ok(BatchOutcome {
        drafts,
        stats,
        failure,
    })
}

/// Extract one chunk and persist its drafts. Any error here aborts the batch.
async fn process_chunk(
    extractor: &Arc<dyn CaseExtractor>,
    chunk: &[ChunkPage],
    store: &CaseStore,
    config: &ExtractionConfig,
    stats: &mut BatchStats,
) -> Result<Vec<DraftCase>, HistocaseError> {
    // Encode every page of the chunk. A failed encode aborts rather than
    // skips: dropping a page here would shift `page_index` for every figure
    // the model reports on the pages after it.
    let mut images: Vec<ImageData> = Vec::with_capacity(chunk.len());
    for page in chunk {
        let data = encode::encode_page(&page.image).map_err(|e| HistocaseError::Internal(
            format!("page {} encoding failed: {}", page.page_num, e),
        ))?;
        images.push(data);
    }

    let extract_start = Instant::now();
    let (cases, usage) = extractor.extract_cases(&images).await?;
    stats.extract_duration_ms += extract_start.elapsed().as_millis() as u64;
    stats.input_tokens += usage.input_tokens;
    stats.output_tokens += usage.output_tokens;
    debug!("Chunk yielded {} cases", cases.len());

    let mut drafts = Vec::with_capacity(cases.len());
    for case in cases {
        let draft = synthesise_draft(case, chunk, config, stats).await;
        store.upsert_draft(&draft)?;
        drafts.push(draft);
    }
    Ok(drafts)
}

/// Turn one parsed case into a persisted-ready draft record.
///
/// Figure regions are resolved against the *current chunk's* page order; a
/// missing or out-of-range `page_index` drops the region. All crops of the
/// case run concurrently and complete before the draft is returned.
async fn synthesise_draft(
    case: ParsedCase,
    chunk: &[ChunkPage],
    config: &ExtractionConfig,
    stats: &mut BatchStats,
) -> DraftCase {
    let case_id = CaseRecord::make_case_id(case.chapter_num.as_deref(), case.case_num.as_deref());

    let sections: Vec<TextSection> = case
        .sections
        .into_iter()
        .map(|s| TextSection::new(s.label, s.content))
        .collect();

    let mut crop_jobs = Vec::new();
    for figure in case.figures {
        match figure.page_index {
            Some(i) if i < chunk.len() => crop_jobs.push((chunk[i].clone(), figure)),
            other => {
                warn!(
                    "Dropping figure region with page index {:?} (chunk has {} pages)",
                    other,
                    chunk.len()
                );
                stats.regions_dropped += 1;
            }
        }
    }

    let handles: Vec<_> = crop_jobs
        .into_iter()
        .enumerate()
        .map(|(seq, (page, figure))| {
            tokio::task::spawn_blocking(move || {
                let cropped = crop_region(&page.image, &figure.bbox);
                encode::to_data_uri(&cropped).map(|data_uri| {
                    let stem = page
                        .source
                        .rsplit_once('.')
                        .map(|(s, _)| s)
                        .unwrap_or(page.source.as_str());
                    ImageEntry {
                        id: Uuid::new_v4(),
                        data_uri,
                        filename: format!("{}_p{}_fig{}.png", stem, page.page_num, seq + 1),
                        stain: figure.stain,
                        magnification: figure.magnification,
                        description: figure.description,
                    }
                })
            })
        })
        .collect();

    let mut entries: Vec<ImageEntry> = Vec::with_capacity(handles.len());
    for joined in join_all(handles).await {
        match joined {
            Ok(Ok(entry)) => {
                stats.regions_cropped += 1;
                entries.push(entry);
            }
            Ok(Err(e)) => {
                warn!("Dropping figure region: crop encoding failed: {}", e);
                stats.regions_dropped += 1;
            }
            Err(e) => {
                warn!("Dropping figure region: crop task panicked: {}", e);
                stats.regions_dropped += 1;
            }
        }
    }

    let now = Utc::now();
    DraftCase::new(CaseRecord {
        case_id,
        owner: config.owner.clone(),
        organ: case.organ,
        sections,
        images: entries,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    #[test]
    fn chunk_count_is_ceil_of_selection() {
        for (pages, size, expect) in [(1usize, 2usize, 1usize), (2, 2, 1), (3, 2, 2), (5, 2, 3), (4, 4, 1), (5, 1, 5)] {
            let items: Vec<usize> = (0..pages).collect();
            let chunks: Vec<&[usize]> = items.chunks(size).collect();
            assert_eq!(chunks.len(), expect, "{} pages / size {}", pages, size);
            // Concatenating the chunks reproduces the original order.
            let flat: Vec<usize> = chunks.concat();
            assert_eq!(flat, items);
        }
    }
}
