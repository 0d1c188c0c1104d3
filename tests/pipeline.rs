//! End-to-end tests for the batch extraction pipeline and store lifecycle.
//!
//! No live model is involved: a scripted [`CaseExtractor`] plays back
//! canned responses (or failures) per chunk, and stores are in-memory, so
//! the whole suite runs offline and deterministically.

use async_trait::async_trait;
use edgequake_llm::ImageData;
use histocase::pipeline::parse::{parse_cases, ParsedCase};
use histocase::{
    run_batch, CaseExtractor, CaseStore, DiagnosticBasis, ExtractUsage, ExtractionConfig,
    HistocaseError, PageQueue, Provenance, QueuedPage, ReviewSession, SectionLabel,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// What the scripted extractor should do for one chunk, in call order.
enum Script {
    /// Respond with this raw model payload (goes through the real parser).
    Json(&'static str),
    /// Fail the call, as a dead network or a 500 would.
    Fail,
}

struct ScriptedExtractor {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedExtractor {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Image counts of each chunk the extractor was called with.
    fn chunk_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaseExtractor for ScriptedExtractor {
    async fn extract_cases(
        &self,
        images: &[ImageData],
    ) -> Result<(Vec<ParsedCase>, ExtractUsage), HistocaseError> {
        self.calls.lock().unwrap().push(images.len());
        match self.scripts.lock().unwrap().pop_front() {
            Some(Script::Json(raw)) => Ok((parse_cases(raw)?, ExtractUsage::default())),
            Some(Script::Fail) => Err(HistocaseError::ApiError {
                message: "connection reset by peer".into(),
            }),
            None => Ok((Vec::new(), ExtractUsage::default())),
        }
    }
}

fn page(n: usize) -> QueuedPage {
    QueuedPage {
        id: Uuid::new_v4(),
        page_num: n,
        source: "atlas.pdf".into(),
        image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            100,
            100,
            Rgba([240, 230, 230, 255]),
        )),
        selected: true,
    }
}

fn queue_of(n: usize) -> PageQueue {
    let mut queue = PageQueue::new();
    for i in 1..=n {
        queue.push(page(i));
    }
    queue
}

fn config_with(extractor: Arc<ScriptedExtractor>) -> ExtractionConfig {
    ExtractionConfig::builder()
        .chunk_size(2)
        .owner("annotator-01")
        .extractor(extractor)
        .build()
        .unwrap()
}

const ONE_CASE_WITH_FIGURE: &str = r#"[
  {
    "chapter_num": "7",
    "case_num": "3",
    "organ": "stomach",
    "sections": [
      {"label": "patient_data", "content": "62-year-old male, epigastric pain"},
      {"label": "diagnosis", "content": "Gastrointestinal stromal tumour"}
    ],
    "figures": [
      {"box_2d": [100, 100, 600, 600], "page_index": 0,
       "stain": "he", "magnification": "x40", "description": "spindle cells"}
    ]
  }
]"#;

// ── Batch orchestration ──────────────────────────────────────────────────────

#[tokio::test]
async fn selected_subset_forms_one_chunk_and_one_draft() {
    // Import 3 pages, select pages 1 and 3 only. Page 1 yields one case with
    // two sections and one figure; page 3 yields nothing.
    let mut queue = queue_of(3);
    queue.set_selected(1, false);

    let extractor = ScriptedExtractor::new(vec![Script::Json(ONE_CASE_WITH_FIGURE)]);
    let config = config_with(Arc::clone(&extractor));
    let store = CaseStore::open_in_memory().unwrap();

    let outcome = run_batch(&mut queue, &store, &config).await.unwrap();

    // Pages 1 and 3 travel together in a single chunk.
    assert_eq!(extractor.chunk_sizes(), vec![2]);
    assert_eq!(outcome.stats.total_chunks, 1);
    assert_eq!(outcome.stats.completed_chunks, 1);
    assert!(outcome.failure.is_none());

    assert_eq!(outcome.drafts.len(), 1);
    let draft = &outcome.drafts[0];
    assert_eq!(draft.record.case_id, "Case-7-3");
    assert_eq!(draft.record.owner, "annotator-01");
    assert_eq!(draft.record.sections.len(), 2);
    assert_eq!(draft.record.images.len(), 1);

    // The figure was cropped from the 100x100 page: box 100..600 → 50x50 px.
    assert!(draft.record.images[0].data_uri.starts_with("data:image/png;base64,"));

    // Drafts were persisted, and the queue was consumed.
    assert_eq!(store.drafts().unwrap().len(), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn chunking_preserves_selection_order() {
    let mut queue = queue_of(5);
    let extractor = ScriptedExtractor::new(vec![]);
    let config = config_with(Arc::clone(&extractor));
    let store = CaseStore::open_in_memory().unwrap();

    let outcome = run_batch(&mut queue, &store, &config).await.unwrap();

    // ceil(5/2) = 3 chunks of sizes 2, 2, 1 in order.
    assert_eq!(extractor.chunk_sizes(), vec![2, 2, 1]);
    assert_eq!(outcome.stats.total_chunks, 3);
    assert_eq!(outcome.drafts.len(), 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn empty_selection_is_a_no_op() {
    let mut queue = queue_of(3);
    queue.deselect_all();

    let extractor = ScriptedExtractor::new(vec![Script::Json(ONE_CASE_WITH_FIGURE)]);
    let config = config_with(Arc::clone(&extractor));
    let store = CaseStore::open_in_memory().unwrap();

    let outcome = run_batch(&mut queue, &store, &config).await.unwrap();

    assert!(extractor.chunk_sizes().is_empty());
    assert_eq!(outcome.stats.total_chunks, 0);
    assert!(outcome.drafts.is_empty());
    // The queue is not consumed by a no-op run.
    assert_eq!(queue.len(), 3);
}

#[tokio::test]
async fn failed_chunk_aborts_but_keeps_earlier_drafts() {
    let mut queue = queue_of(4);
    let extractor = ScriptedExtractor::new(vec![
        Script::Json(ONE_CASE_WITH_FIGURE),
        Script::Fail,
    ]);
    let config = config_with(Arc::clone(&extractor));
    let store = CaseStore::open_in_memory().unwrap();

    let outcome = run_batch(&mut queue, &store, &config).await.unwrap();

    // Chunk 2 failed; no third call was attempted.
    assert_eq!(extractor.chunk_sizes(), vec![2, 2]);
    let failure = outcome.failure.as_ref().expect("batch should report failure");
    assert_eq!(failure.chunk, 2);

    // The first chunk's draft survived, in memory and in the store.
    assert_eq!(outcome.drafts.len(), 1);
    assert_eq!(outcome.stats.completed_chunks, 1);
    assert_eq!(store.drafts().unwrap().len(), 1);

    // A partial run does not consume the queue.
    assert_eq!(queue.len(), 4);

    // Strict callers can escalate the failure.
    assert!(matches!(
        outcome.into_result(),
        Err(HistocaseError::ExtractionFailed { chunk: 2, .. })
    ));
}

#[tokio::test]
async fn out_of_range_page_index_drops_region_only() {
    let mut queue = queue_of(2);
    let extractor = ScriptedExtractor::new(vec![Script::Json(
        r#"[{
          "chapter_num": "1", "case_num": "9", "organ": "",
          "sections": [{"label": "diagnosis", "content": "lipoma"}],
          "figures": [
            {"box_2d": [0, 0, 500, 500], "page_index": 7,
             "stain": "he", "magnification": "x10", "description": "beyond the chunk"},
            {"box_2d": [0, 0, 500, 500],
             "stain": "he", "magnification": "x10", "description": "no index"}
          ]
        }]"#,
    )]);
    let config = config_with(Arc::clone(&extractor));
    let store = CaseStore::open_in_memory().unwrap();

    let outcome = run_batch(&mut queue, &store, &config).await.unwrap();

    assert!(outcome.failure.is_none());
    assert_eq!(outcome.drafts.len(), 1);
    // Both regions referenced pages outside the chunk: dropped, case kept.
    assert!(outcome.drafts[0].record.images.is_empty());
    assert_eq!(outcome.stats.regions_dropped, 2);
    assert_eq!(outcome.stats.regions_cropped, 0);
}

#[tokio::test]
async fn organ_defaults_to_empty_and_case_id_to_zero() {
    let mut queue = queue_of(1);
    let extractor = ScriptedExtractor::new(vec![Script::Json(
        r#"[{"sections": [{"label": "diagnosis", "content": "cyst"}], "figures": []}]"#,
    )]);
    let config = config_with(Arc::clone(&extractor));
    let store = CaseStore::open_in_memory().unwrap();

    let outcome = run_batch(&mut queue, &store, &config).await.unwrap();
    assert_eq!(outcome.drafts[0].record.case_id, "Case-0-0");
    assert_eq!(outcome.drafts[0].record.organ, "");
}

// ── Review → confirm → export lifecycle ──────────────────────────────────────

#[tokio::test]
async fn extract_review_confirm_export_round_trip() {
    let mut queue = queue_of(2);
    let extractor = ScriptedExtractor::new(vec![Script::Json(ONE_CASE_WITH_FIGURE)]);
    let config = config_with(Arc::clone(&extractor));
    let store = CaseStore::open_in_memory().unwrap();

    let outcome = run_batch(&mut queue, &store, &config).await.unwrap();
    let draft_id = outcome.drafts[0].draft_id;

    // Review: fill in the diagnostic basis, tweak a figure description.
    let mut session = ReviewSession::load(&store, draft_id).unwrap();
    session
        .set_basis(&DiagnosticBasis {
            gross: "well-circumscribed 4 cm mass".into(),
            he: "spindle cells in short fascicles".into(),
            ihc: String::new(),
            general: String::new(),
        })
        .unwrap();
    let image_id = session.record().images[0].id;
    session
        .set_image_description(image_id, "spindle cells, low power")
        .unwrap();

    // Confirm: the draft leaves the draft collection; exactly one confirmed
    // entry appears under the same case id, with no draft-only fields.
    let confirmed = session.confirm().unwrap();
    assert_eq!(confirmed.record.case_id, "Case-7-3");
    assert!(store.get_draft(draft_id).unwrap().is_none());
    assert_eq!(store.cases().unwrap().len(), 1);

    let history = store.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].provenance, Provenance::Confirmed);
    assert!(history[0].draft_id.is_none());

    // Export: grouped projection of the confirmed record.
    let json = histocase::to_json(&confirmed.record).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["case_id"], "Case-7-3");
    assert_eq!(value["images"]["he"].as_array().unwrap().len(), 1);
    assert_eq!(
        value["sections"]["diagnostic_basis"]["gross"],
        "well-circumscribed 4 cm mass"
    );
}

#[tokio::test]
async fn reconfirming_same_case_id_overwrites() {
    let store = CaseStore::open_in_memory().unwrap();

    for organ in ["stomach", "colon"] {
        let mut queue = queue_of(1);
        let extractor = ScriptedExtractor::new(vec![Script::Json(ONE_CASE_WITH_FIGURE)]);
        let config = config_with(Arc::clone(&extractor));
        let outcome = run_batch(&mut queue, &store, &config).await.unwrap();

        let mut session = ReviewSession::load(&store, outcome.drafts[0].draft_id).unwrap();
        session.set_organ(organ).unwrap();
        session.confirm().unwrap();
    }

    let cases = store.cases().unwrap();
    assert_eq!(cases.len(), 1, "same case id must overwrite, not duplicate");
    assert_eq!(cases[0].record.organ, "colon");
}

#[tokio::test]
async fn deleted_draft_never_reaches_history() {
    let mut queue = queue_of(1);
    let extractor = ScriptedExtractor::new(vec![Script::Json(ONE_CASE_WITH_FIGURE)]);
    let config = config_with(Arc::clone(&extractor));
    let store = CaseStore::open_in_memory().unwrap();

    let outcome = run_batch(&mut queue, &store, &config).await.unwrap();
    let draft_id = outcome.drafts[0].draft_id;

    ReviewSession::load(&store, draft_id).unwrap().delete().unwrap();

    assert!(store.get_draft(draft_id).unwrap().is_none());
    assert!(store.drafts().unwrap().is_empty());
    assert!(store.history().unwrap().is_empty());
}

// ── Diagnostic basis convention ──────────────────────────────────────────────

#[test]
fn diagnostic_basis_round_trips_and_collapses() {
    // Structured sub-fields serialise to a structured form and read back.
    let full = DiagnosticBasis {
        gross: "firm white cut surface".into(),
        he: "nests of uniform cells".into(),
        ihc: "chromogranin positive".into(),
        general: "consistent with NET G1".into(),
    };
    let reread = DiagnosticBasis::from_content(&full.to_content());
    assert_eq!(reread, full);

    // Clearing gross/he/ihc but keeping general collapses storage to the
    // plain general text.
    let only_general = DiagnosticBasis {
        general: "consistent with NET G1".into(),
        ..DiagnosticBasis::default()
    };
    assert_eq!(only_general.to_content(), "consistent with NET G1");
    assert_eq!(
        DiagnosticBasis::from_content("consistent with NET G1"),
        only_general
    );
}

#[test]
fn required_sections_are_advisory() {
    let store = CaseStore::open_in_memory().unwrap();
    let record = histocase::CaseRecord {
        case_id: "Case-2-2".into(),
        owner: "op".into(),
        organ: String::new(),
        sections: vec![],
        images: vec![],
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    let draft = histocase::DraftCase::new(record);
    store.upsert_draft(&draft).unwrap();

    assert_eq!(draft.record.missing_required().len(), 4);
    // Confirmation still succeeds: the requirement only advises.
    assert!(store.confirm(draft.draft_id).is_ok());
    assert!(store
        .cases()
        .unwrap()
        .iter()
        .any(|c| c.record.case_id == "Case-2-2"));
    let _ = SectionLabel::REQUIRED; // the advisory set itself is public API
}
