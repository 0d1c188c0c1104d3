//! Review state: write-through editing of one draft.
//!
//! Every mutator on [`ReviewSession`] rewrites the in-memory draft, stamps
//! `updated_at`, and writes through to the store before returning. There is
//! no dirty flag and no explicit save: the store is always consistent with
//! the last edit, so a reload (or a crash) can never observe a half-edited
//! record. Writes are issued one per edit with no coalescing — reordering or
//! dropping edits would break the "every mutation is durably observable
//! before the next read" contract.
//!
//! Confirmation is the only operation that migrates a record out of the
//! draft collection; it consumes the session.

use crate::error::HistocaseError;
use crate::model::{
    CaseRecord, ConfirmedCase, DiagnosticBasis, DraftCase, Magnification, SectionLabel, StainType,
    TextSection,
};
use crate::store::CaseStore;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

/// An editing session over a single draft.
pub struct ReviewSession<'a> {
    store: &'a CaseStore,
    draft: DraftCase,
}

impl<'a> ReviewSession<'a> {
    /// Load a draft for review.
    pub fn load(store: &'a CaseStore, draft_id: Uuid) -> Result<Self, HistocaseError> {
        let draft = store
            .get_draft(draft_id)?
            .ok_or(HistocaseError::DraftNotFound {
                draft_id: draft_id.to_string(),
            })?;
        Ok(Self { store, draft })
    }

    /// Begin reviewing a draft that is already in hand (e.g. fresh from a
    /// batch run). The draft is persisted as-is before editing starts.
    pub fn begin(store: &'a CaseStore, draft: DraftCase) -> Result<Self, HistocaseError> {
        store.upsert_draft(&draft)?;
        Ok(Self { store, draft })
    }

    pub fn draft(&self) -> &DraftCase {
        &self.draft
    }

    pub fn record(&self) -> &CaseRecord {
        &self.draft.record
    }

    /// Stamp and write through. Called at the end of every mutator.
    fn persist(&mut self) -> Result<(), HistocaseError> {
        self.draft.record.updated_at = Utc::now();
        self.store.upsert_draft(&self.draft)
    }

    // ── Record-level fields ───────────────────────────────────────────────

    pub fn set_case_id(&mut self, case_id: impl Into<String>) -> Result<(), HistocaseError> {
        self.draft.record.case_id = case_id.into();
        self.persist()
    }

    pub fn set_organ(&mut self, organ: impl Into<String>) -> Result<(), HistocaseError> {
        self.draft.record.organ = organ.into();
        self.persist()
    }

    // ── Text sections ─────────────────────────────────────────────────────

    pub fn add_section(&mut self, label: SectionLabel) -> Result<Uuid, HistocaseError> {
        let section = TextSection::new(label, "");
        let id = section.id;
        self.draft.record.sections.push(section);
        self.persist()?;
        Ok(id)
    }

    pub fn set_section_content(
        &mut self,
        section_id: Uuid,
        content: impl Into<String>,
    ) -> Result<(), HistocaseError> {
        let section = self
            .draft
            .record
            .section_mut(section_id)
            .ok_or(HistocaseError::SectionNotFound { id: section_id })?;
        section.content = content.into();
        self.persist()
    }

    pub fn set_section_label(
        &mut self,
        section_id: Uuid,
        label: SectionLabel,
    ) -> Result<(), HistocaseError> {
        let section = self
            .draft
            .record
            .section_mut(section_id)
            .ok_or(HistocaseError::SectionNotFound { id: section_id })?;
        section.label = label;
        self.persist()
    }

    pub fn remove_section(&mut self, section_id: Uuid) -> Result<(), HistocaseError> {
        let before = self.draft.record.sections.len();
        self.draft.record.sections.retain(|s| s.id != section_id);
        if self.draft.record.sections.len() == before {
            return Err(HistocaseError::SectionNotFound { id: section_id });
        }
        self.persist()
    }

    // ── Diagnostic basis ──────────────────────────────────────────────────

    /// The structured view of the diagnostic-basis section, default when the
    /// section is absent or plain text.
    pub fn basis(&self) -> DiagnosticBasis {
        self.draft
            .record
            .sections
            .iter()
            .find(|s| s.label == SectionLabel::DiagnosticBasis)
            .map(|s| DiagnosticBasis::from_content(&s.content))
            .unwrap_or_default()
    }

    /// Write the structured basis back into the diagnostic-basis section,
    /// creating the section if the draft has none yet.
    pub fn set_basis(&mut self, basis: &DiagnosticBasis) -> Result<(), HistocaseError> {
        let content = basis.to_content();
        match self
            .draft
            .record
            .sections
            .iter_mut()
            .find(|s| s.label == SectionLabel::DiagnosticBasis)
        {
            Some(section) => section.content = content,
            None => self
                .draft
                .record
                .sections
                .push(TextSection::new(SectionLabel::DiagnosticBasis, content)),
        }
        self.persist()
    }

    // ── Image entries ─────────────────────────────────────────────────────

    pub fn set_image_stain(
        &mut self,
        image_id: Uuid,
        stain: StainType,
    ) -> Result<(), HistocaseError> {
        let image = self
            .draft
            .record
            .image_mut(image_id)
            .ok_or(HistocaseError::ImageNotFound { id: image_id })?;
        image.stain = stain;
        self.persist()
    }

    pub fn set_image_magnification(
        &mut self,
        image_id: Uuid,
        magnification: Magnification,
    ) -> Result<(), HistocaseError> {
        let image = self
            .draft
            .record
            .image_mut(image_id)
            .ok_or(HistocaseError::ImageNotFound { id: image_id })?;
        image.magnification = magnification;
        self.persist()
    }

    pub fn set_image_description(
        &mut self,
        image_id: Uuid,
        description: impl Into<String>,
    ) -> Result<(), HistocaseError> {
        let image = self
            .draft
            .record
            .image_mut(image_id)
            .ok_or(HistocaseError::ImageNotFound { id: image_id })?;
        image.description = description.into();
        self.persist()
    }

    pub fn remove_image(&mut self, image_id: Uuid) -> Result<(), HistocaseError> {
        let before = self.draft.record.images.len();
        self.draft.record.images.retain(|i| i.id != image_id);
        if self.draft.record.images.len() == before {
            return Err(HistocaseError::ImageNotFound { id: image_id });
        }
        self.persist()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Confirm the draft, consuming the session.
    ///
    /// Unfilled required sections only warn — the requirement is advisory.
    pub fn confirm(self) -> Result<ConfirmedCase, HistocaseError> {
        let missing = self.draft.record.missing_required();
        if !missing.is_empty() {
            warn!(
                "Confirming {} with empty required sections: {:?}",
                self.draft.record.case_id, missing
            );
        }
        self.store.confirm(self.draft.draft_id)
    }

    /// Discard the draft entirely, consuming the session.
    pub fn delete(self) -> Result<(), HistocaseError> {
        info!("Deleting draft {}", self.draft.draft_id);
        self.store.delete_draft(self.draft.draft_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> DraftCase {
        DraftCase::new(CaseRecord {
            case_id: "Case-1-1".into(),
            owner: "op".into(),
            organ: String::new(),
            sections: vec![
                TextSection::new(SectionLabel::PatientData, "62M"),
                TextSection::new(SectionLabel::Diagnosis, "GIST"),
            ],
            images: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[test]
    fn every_edit_is_immediately_persisted() {
        let store = CaseStore::open_in_memory().unwrap();
        let d = draft();
        let draft_id = d.draft_id;
        let section_id = d.record.sections[0].id;

        let mut session = ReviewSession::begin(&store, d).unwrap();
        session.set_organ("stomach").unwrap();
        session
            .set_section_content(section_id, "62-year-old male")
            .unwrap();

        // A fresh read observes the last edit without any explicit save.
        let reloaded = store.get_draft(draft_id).unwrap().unwrap();
        assert_eq!(reloaded.record.organ, "stomach");
        assert_eq!(reloaded.record.sections[0].content, "62-year-old male");
    }

    #[test]
    fn unknown_section_is_an_error() {
        let store = CaseStore::open_in_memory().unwrap();
        let mut session = ReviewSession::begin(&store, draft()).unwrap();
        let result = session.set_section_content(Uuid::new_v4(), "x");
        assert!(matches!(result, Err(HistocaseError::SectionNotFound { .. })));
    }

    #[test]
    fn basis_edit_round_trips_through_store() {
        let store = CaseStore::open_in_memory().unwrap();
        let d = draft();
        let draft_id = d.draft_id;
        let mut session = ReviewSession::begin(&store, d).unwrap();

        let basis = DiagnosticBasis {
            gross: "solitary gastric mass".into(),
            he: "spindle cells".into(),
            ihc: "CD117+".into(),
            general: String::new(),
        };
        session.set_basis(&basis).unwrap();

        let session = ReviewSession::load(&store, draft_id).unwrap();
        assert_eq!(session.basis(), basis);

        // Clearing the structured fields collapses storage to plain text.
        let mut session = session;
        session
            .set_basis(&DiagnosticBasis {
                general: "classic morphology".into(),
                ..DiagnosticBasis::default()
            })
            .unwrap();
        let stored = store.get_draft(draft_id).unwrap().unwrap();
        let content = &stored
            .record
            .sections
            .iter()
            .find(|s| s.label == SectionLabel::DiagnosticBasis)
            .unwrap()
            .content;
        assert_eq!(content, "classic morphology");
    }

    #[test]
    fn confirm_strips_draft_identity() {
        let store = CaseStore::open_in_memory().unwrap();
        let d = draft();
        let draft_id = d.draft_id;
        let session = ReviewSession::begin(&store, d).unwrap();

        let confirmed = session.confirm().unwrap();
        assert_eq!(confirmed.record.case_id, "Case-1-1");
        assert!(store.get_draft(draft_id).unwrap().is_none());
        assert!(store.get_case("Case-1-1").unwrap().is_some());
    }

    #[test]
    fn remove_section_and_image_validate_identity() {
        let store = CaseStore::open_in_memory().unwrap();
        let d = draft();
        let section_id = d.record.sections[1].id;
        let mut session = ReviewSession::begin(&store, d).unwrap();

        session.remove_section(section_id).unwrap();
        assert_eq!(session.record().sections.len(), 1);
        assert!(matches!(
            session.remove_image(Uuid::new_v4()),
            Err(HistocaseError::ImageNotFound { .. })
        ));
    }
}
