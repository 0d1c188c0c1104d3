//! Export: project a case record into the training-data JSON schema.
//!
//! The projection is pure — it reads one [`CaseRecord`] and produces a
//! nested document with sections grouped by label and images grouped by
//! stain type. Nothing is written anywhere; serialising and shipping the
//! result is the caller's business.

use crate::error::HistocaseError;
use crate::model::{CaseRecord, DiagnosticBasis, Magnification, SectionLabel};
use serde::Serialize;

/// One exported figure.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingImage {
    pub filename: String,
    pub magnification: Magnification,
    pub description: String,
    pub data_uri: String,
}

/// Diagnostic-basis content in its richest available form: the structured
/// sub-record when the stored content parses as one, the plain text
/// otherwise.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BasisExport {
    Structured(DiagnosticBasis),
    Text(String),
}

/// Sections grouped by label. Repeated labels are concatenated in record
/// order, blank-line separated.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingSections {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub patient_data: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub gross_exam: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ihc_text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub diagnosis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_basis: Option<BasisExport>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub differential_diagnosis: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub knowledge_extension: String,
}

/// Images grouped by stain type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingImages {
    pub he: Vec<TrainingImage>,
    pub ihc: Vec<TrainingImage>,
}

/// A case record reshaped for downstream training-data consumption.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRecord {
    pub case_id: String,
    pub owner: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub organ: String,
    pub sections: TrainingSections,
    pub images: TrainingImages,
}

/// Build the training-data projection of a record.
pub fn training_record(record: &CaseRecord) -> TrainingRecord {
    let mut sections = TrainingSections::default();
    let mut basis_text = String::new();

    for section in &record.sections {
        let slot = match section.label {
            SectionLabel::PatientData => &mut sections.patient_data,
            SectionLabel::GrossExam => &mut sections.gross_exam,
            SectionLabel::IhcText => &mut sections.ihc_text,
            SectionLabel::Diagnosis => &mut sections.diagnosis,
            SectionLabel::DiagnosticBasis => &mut basis_text,
            SectionLabel::DifferentialDiagnosis => &mut sections.differential_diagnosis,
            SectionLabel::KnowledgeExtension => &mut sections.knowledge_extension,
        };
        append_grouped(slot, &section.content);
    }

    if !basis_text.is_empty() {
        let basis = DiagnosticBasis::from_content(&basis_text);
        sections.diagnostic_basis = Some(
            if basis.gross.is_empty() && basis.he.is_empty() && basis.ihc.is_empty() {
                BasisExport::Text(basis.general)
            } else {
                BasisExport::Structured(basis)
            },
        );
    }

    let mut images = TrainingImages::default();
    for entry in &record.images {
        let exported = TrainingImage {
            filename: entry.filename.clone(),
            magnification: entry.magnification,
            description: entry.description.clone(),
            data_uri: entry.data_uri.clone(),
        };
        match entry.stain {
            crate::model::StainType::He => images.he.push(exported),
            crate::model::StainType::Ihc => images.ihc.push(exported),
        }
    }

    TrainingRecord {
        case_id: record.case_id.clone(),
        owner: record.owner.clone(),
        organ: record.organ.clone(),
        sections,
        images,
    }
}

/// Serialise the projection as pretty JSON.
pub fn to_json(record: &CaseRecord) -> Result<String, HistocaseError> {
    Ok(serde_json::to_string_pretty(&training_record(record))?)
}

fn append_grouped(slot: &mut String, content: &str) {
    if content.is_empty() {
        return;
    }
    if !slot.is_empty() {
        slot.push_str("\n\n");
    }
    slot.push_str(content);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageEntry, StainType, TextSection};
    use chrono::Utc;
    use uuid::Uuid;

    fn record() -> CaseRecord {
        CaseRecord {
            case_id: "Case-7-3".into(),
            owner: "op".into(),
            organ: "stomach".into(),
            sections: vec![
                TextSection::new(SectionLabel::PatientData, "62M, epigastric pain"),
                TextSection::new(SectionLabel::Diagnosis, "GIST"),
                TextSection::new(SectionLabel::Diagnosis, "low risk category"),
            ],
            images: vec![
                ImageEntry {
                    id: Uuid::new_v4(),
                    data_uri: "data:image/png;base64,AA==".into(),
                    filename: "atlas_p1_fig1.png".into(),
                    stain: StainType::He,
                    magnification: Magnification::X40,
                    description: "spindle cells".into(),
                },
                ImageEntry {
                    id: Uuid::new_v4(),
                    data_uri: "data:image/png;base64,BB==".into(),
                    filename: "atlas_p1_fig2.png".into(),
                    stain: StainType::Ihc,
                    magnification: Magnification::X200,
                    description: "CD117".into(),
                },
            ],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn groups_images_by_stain() {
        let training = training_record(&record());
        assert_eq!(training.images.he.len(), 1);
        assert_eq!(training.images.ihc.len(), 1);
        assert_eq!(training.images.he[0].filename, "atlas_p1_fig1.png");
    }

    #[test]
    fn repeated_labels_concatenate_in_order() {
        let training = training_record(&record());
        assert_eq!(training.sections.diagnosis, "GIST\n\nlow risk category");
    }

    #[test]
    fn structured_basis_is_expanded() {
        let mut rec = record();
        let basis = DiagnosticBasis {
            he: "spindle cells in fascicles".into(),
            ihc: "CD117 and DOG1 positive".into(),
            ..DiagnosticBasis::default()
        };
        rec.sections
            .push(TextSection::new(SectionLabel::DiagnosticBasis, basis.to_content()));

        let json = to_json(&rec).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value["sections"]["diagnostic_basis"]["he"],
            "spindle cells in fascicles"
        );
    }

    #[test]
    fn plain_basis_stays_text() {
        let mut rec = record();
        rec.sections.push(TextSection::new(
            SectionLabel::DiagnosticBasis,
            "morphology alone is diagnostic",
        ));
        let training = training_record(&rec);
        match training.sections.diagnostic_basis {
            Some(BasisExport::Text(ref t)) => assert_eq!(t, "morphology alone is diagnostic"),
            other => panic!("expected plain text basis, got {:?}", other),
        }
    }

    #[test]
    fn projection_does_not_touch_the_record() {
        let rec = record();
        let before = serde_json::to_string(&rec).unwrap();
        let _ = training_record(&rec);
        assert_eq!(serde_json::to_string(&rec).unwrap(), before);
    }
}
