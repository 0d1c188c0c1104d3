//! Core record types: case records, text sections, figure entries.
//!
//! A [`CaseRecord`] is the unit of work for the whole crate. It exists in two
//! homes: wrapped in a [`DraftCase`] while a human is still reviewing it, and
//! wrapped in a [`ConfirmedCase`] once review is done. The draft identity is
//! deliberately local-only — confirmation strips it, and from then on the
//! human-meaningful `case_id` is the durable key. Confirming the same
//! `case_id` twice overwrites rather than duplicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Enumerations ─────────────────────────────────────────────────────────

/// The seven fixed content-section categories of a case record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionLabel {
    PatientData,
    GrossExam,
    IhcText,
    Diagnosis,
    DiagnosticBasis,
    DifferentialDiagnosis,
    KnowledgeExtension,
}

impl SectionLabel {
    /// All labels, in the order sections are conventionally presented.
    pub const ALL: [SectionLabel; 7] = [
        SectionLabel::PatientData,
        SectionLabel::GrossExam,
        SectionLabel::IhcText,
        SectionLabel::Diagnosis,
        SectionLabel::DiagnosticBasis,
        SectionLabel::DifferentialDiagnosis,
        SectionLabel::KnowledgeExtension,
    ];

    /// The four labels a record should fill in before confirmation.
    /// Advisory only — confirmation never enforces this.
    pub const REQUIRED: [SectionLabel; 4] = [
        SectionLabel::PatientData,
        SectionLabel::GrossExam,
        SectionLabel::Diagnosis,
        SectionLabel::DiagnosticBasis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionLabel::PatientData => "patient_data",
            SectionLabel::GrossExam => "gross_exam",
            SectionLabel::IhcText => "ihc_text",
            SectionLabel::Diagnosis => "diagnosis",
            SectionLabel::DiagnosticBasis => "diagnostic_basis",
            SectionLabel::DifferentialDiagnosis => "differential_diagnosis",
            SectionLabel::KnowledgeExtension => "knowledge_extension",
        }
    }

    /// Parse a model-reported label leniently.
    ///
    /// The enumeration has no "other" bucket, so an unrecognised label is a
    /// contract violation and yields `None` — the caller drops the section.
    pub fn parse_lenient(s: &str) -> Option<SectionLabel> {
        let norm: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match norm.as_str() {
            "patient_data" | "patient" => Some(SectionLabel::PatientData),
            "gross_exam" | "gross_examination" | "gross" => Some(SectionLabel::GrossExam),
            "ihc_text" | "ihc" | "immunohistochemistry" => Some(SectionLabel::IhcText),
            "diagnosis" => Some(SectionLabel::Diagnosis),
            "diagnostic_basis" => Some(SectionLabel::DiagnosticBasis),
            "differential_diagnosis" | "differential" => Some(SectionLabel::DifferentialDiagnosis),
            "knowledge_extension" | "knowledge" => Some(SectionLabel::KnowledgeExtension),
            _ => None,
        }
    }
}

/// H&E or IHC classification of a microscopy figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StainType {
    He,
    Ihc,
}

impl StainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StainType::He => "he",
            StainType::Ihc => "ihc",
        }
    }

    /// Parse a model-reported stain leniently.
    ///
    /// Two-valued with no fallback bucket: an unrecognised stain rejects the
    /// whole region rather than guessing.
    pub fn parse_lenient(s: &str) -> Option<StainType> {
        let norm: String = s
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match norm.as_str() {
            "he" | "hestain" | "hematoxylineosin" | "hematoxylinandeosin" => Some(StainType::He),
            "ihc" | "ihcstain" | "immunohistochemistry" => Some(StainType::Ihc),
            _ => None,
        }
    }
}

/// Enumerated zoom-level label attached to a microscopy figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnification {
    X10,
    X20,
    X40,
    X100,
    X200,
    X400,
    #[default]
    Other,
}

impl Magnification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Magnification::X10 => "x10",
            Magnification::X20 => "x20",
            Magnification::X40 => "x40",
            Magnification::X100 => "x100",
            Magnification::X200 => "x200",
            Magnification::X400 => "x400",
            Magnification::Other => "other",
        }
    }

    /// Parse a model-reported magnification, coercing anything outside the
    /// enumeration to [`Magnification::Other`].
    pub fn parse_lenient(s: &str) -> Magnification {
        match s.trim().to_lowercase().replace(['×', '*'], "x").as_str() {
            "x10" | "10x" | "10" => Magnification::X10,
            "x20" | "20x" | "20" => Magnification::X20,
            "x40" | "40x" | "40" => Magnification::X40,
            "x100" | "100x" | "100" => Magnification::X100,
            "x200" | "200x" | "200" => Magnification::X200,
            "x400" | "400x" | "400" => Magnification::X400,
            _ => Magnification::Other,
        }
    }
}

// ── Records ──────────────────────────────────────────────────────────────

/// One free-text content section of a case record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSection {
    pub id: Uuid,
    pub label: SectionLabel,
    pub content: String,
}

impl TextSection {
    pub fn new(label: SectionLabel, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
            content: content.into(),
        }
    }
}

/// One cropped figure attached to a case record.
///
/// The payload is a displayable `data:image/png;base64,…` URI so records are
/// self-contained — no side-car files to keep in sync with the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub id: Uuid,
    pub data_uri: String,
    pub filename: String,
    pub stain: StainType,
    pub magnification: Magnification,
    pub description: String,
}

/// A structured case record extracted from one or more textbook pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Human-meaningful identity, `Case-<chapter>-<number>`. Durable key for
    /// confirmed records.
    pub case_id: String,
    /// Operator session that owns this record.
    pub owner: String,
    /// Organ or category label; empty when the model offered no guess.
    pub organ: String,
    pub sections: Vec<TextSection>,
    pub images: Vec<ImageEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaseRecord {
    /// Synthesise the case identity from chapter/case numbers, each
    /// defaulting to "0" when the model reported none.
    pub fn make_case_id(chapter: Option<&str>, number: Option<&str>) -> String {
        format!(
            "Case-{}-{}",
            chapter.filter(|s| !s.is_empty()).unwrap_or("0"),
            number.filter(|s| !s.is_empty()).unwrap_or("0"),
        )
    }

    /// Which of the four required labels still have no non-empty content.
    /// Advisory: callers may warn on confirmation but never block it.
    pub fn missing_required(&self) -> Vec<SectionLabel> {
        SectionLabel::REQUIRED
            .iter()
            .copied()
            .filter(|label| {
                !self
                    .sections
                    .iter()
                    .any(|s| s.label == *label && !s.content.trim().is_empty())
            })
            .collect()
    }

    pub fn section_mut(&mut self, section_id: Uuid) -> Option<&mut TextSection> {
        self.sections.iter_mut().find(|s| s.id == section_id)
    }

    pub fn image_mut(&mut self, image_id: Uuid) -> Option<&mut ImageEntry> {
        self.images.iter_mut().find(|i| i.id == image_id)
    }
}

/// An unconfirmed case record pending human review.
///
/// The `draft_id` is local-only; it never appears on a confirmed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftCase {
    pub draft_id: Uuid,
    pub record: CaseRecord,
}

impl DraftCase {
    pub fn new(record: CaseRecord) -> Self {
        Self {
            draft_id: Uuid::new_v4(),
            record,
        }
    }
}

/// A reviewed record in durable long-term storage, keyed by `case_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedCase {
    pub record: CaseRecord,
    pub confirmed_at: DateTime<Utc>,
}

// ── Diagnostic basis ─────────────────────────────────────────────────────

/// Structured sub-record embedded as serialised JSON inside the
/// diagnostic-basis section content.
///
/// This is a content-level convention, not a schema change: the section still
/// stores a plain string. When only the `general` field carries text the
/// storage collapses back to that plain text, so simple records never pay the
/// JSON envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticBasis {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gross: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub he: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ihc: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub general: String,
}

impl DiagnosticBasis {
    pub fn is_empty(&self) -> bool {
        self.gross.is_empty() && self.he.is_empty() && self.ihc.is_empty() && self.general.is_empty()
    }

    /// Parse section content into its structured form.
    ///
    /// Content is structured iff it is a JSON object whose keys are a subset
    /// of the four field names with at least one present; anything else is
    /// plain text and lands in `general`.
    pub fn from_content(content: &str) -> DiagnosticBasis {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
            if let Some(map) = value.as_object() {
                let known = ["gross", "he", "ihc", "general"];
                if !map.is_empty() && map.keys().all(|k| known.contains(&k.as_str())) {
                    if let Ok(basis) = serde_json::from_value::<DiagnosticBasis>(value) {
                        return basis;
                    }
                }
            }
        }
        DiagnosticBasis {
            general: content.to_string(),
            ..DiagnosticBasis::default()
        }
    }

    /// Serialise back to section content.
    ///
    /// Collapses to plain text when only `general` is set; empty basis
    /// collapses to the empty string.
    pub fn to_content(&self) -> String {
        if self.gross.is_empty() && self.he.is_empty() && self.ihc.is_empty() {
            return self.general.clone();
        }
        // Structured fields present: keep the JSON envelope.
        serde_json::to_string(self).unwrap_or_else(|_| self.general.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_id_defaults_missing_parts_to_zero() {
        assert_eq!(CaseRecord::make_case_id(Some("3"), Some("12")), "Case-3-12");
        assert_eq!(CaseRecord::make_case_id(None, Some("12")), "Case-0-12");
        assert_eq!(CaseRecord::make_case_id(Some(""), None), "Case-0-0");
    }

    #[test]
    fn section_label_lenient_parse() {
        assert_eq!(
            SectionLabel::parse_lenient("Gross Exam"),
            Some(SectionLabel::GrossExam)
        );
        assert_eq!(
            SectionLabel::parse_lenient("differential-diagnosis"),
            Some(SectionLabel::DifferentialDiagnosis)
        );
        assert_eq!(SectionLabel::parse_lenient("figure caption"), None);
    }

    #[test]
    fn stain_lenient_parse_rejects_unknown() {
        assert_eq!(StainType::parse_lenient("H&E"), Some(StainType::He));
        assert_eq!(StainType::parse_lenient("IHC"), Some(StainType::Ihc));
        assert_eq!(StainType::parse_lenient("trichrome"), None);
    }

    #[test]
    fn magnification_coerces_to_other() {
        assert_eq!(Magnification::parse_lenient("40x"), Magnification::X40);
        assert_eq!(Magnification::parse_lenient("×200"), Magnification::X200);
        assert_eq!(Magnification::parse_lenient("25x"), Magnification::Other);
        assert_eq!(Magnification::parse_lenient(""), Magnification::Other);
    }

    #[test]
    fn missing_required_reports_empty_labels() {
        let record = CaseRecord {
            case_id: "Case-1-1".into(),
            owner: "op".into(),
            organ: String::new(),
            sections: vec![
                TextSection::new(SectionLabel::PatientData, "58F"),
                TextSection::new(SectionLabel::Diagnosis, ""),
            ],
            images: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let missing = record.missing_required();
        assert!(missing.contains(&SectionLabel::GrossExam));
        assert!(missing.contains(&SectionLabel::Diagnosis));
        assert!(missing.contains(&SectionLabel::DiagnosticBasis));
        assert!(!missing.contains(&SectionLabel::PatientData));
    }

    #[test]
    fn basis_round_trips_structured_fields() {
        let basis = DiagnosticBasis {
            gross: "well-circumscribed mass".into(),
            he: "spindle cells in fascicles".into(),
            ihc: "CD117 positive".into(),
            general: String::new(),
        };
        let content = basis.to_content();
        assert!(content.starts_with('{'));
        assert_eq!(DiagnosticBasis::from_content(&content), basis);
    }

    #[test]
    fn basis_collapses_to_plain_text_when_only_general() {
        let basis = DiagnosticBasis {
            general: "overall picture fits GIST".into(),
            ..DiagnosticBasis::default()
        };
        let content = basis.to_content();
        assert_eq!(content, "overall picture fits GIST");
        let reparsed = DiagnosticBasis::from_content(&content);
        assert_eq!(reparsed.general, "overall picture fits GIST");
        assert!(reparsed.gross.is_empty());
    }

    #[test]
    fn basis_plain_text_passes_through() {
        let basis = DiagnosticBasis::from_content("morphology is diagnostic");
        assert_eq!(basis.general, "morphology is diagnostic");
        assert!(basis.he.is_empty());
    }

    #[test]
    fn basis_empty_content_is_empty() {
        assert!(DiagnosticBasis::from_content("").general.is_empty());
        assert_eq!(DiagnosticBasis::default().to_content(), "");
    }
}
