//! Instruction prompts for vision-model case extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the extraction contract (a new
//!    section label, a different bounding-box convention) requires editing
//!    exactly one place, together with the wire types in
//!    [`crate::pipeline::parse`].
//!
//! 2. **Testability** — unit tests can inspect the prompt directly without a
//!    live model, so contract drift between prompt and parser is easy to catch.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constant here is
//! used only when no override is provided.

/// Default instruction prompt for extracting case records from pathology
/// textbook page images.
///
/// The attached images are the pages of one chunk, in order; `page_index`
/// in the output refers to that order, starting at 0.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert pathology annotator. You are given one or more scanned pages from a pathology textbook. Extract every diagnosable case into structured JSON.

Follow these rules precisely:

1. OUTPUT SHAPE
   - Output ONLY a JSON array of case objects. No commentary, no markdown fences.
   - If no page contains a diagnosable case, output exactly: []

2. CASE OBJECT
   Each case object has these fields:
   - "chapter_num": chapter number printed near the case, as a string ("0" if absent)
   - "case_num": case number printed near the case, as a string ("0" if absent)
   - "organ": the organ or disease category of the case ("" if unclear)
   - "sections": array of { "label", "content" }
   - "figures": array of detected figure regions (see rule 4)

3. TEXT SECTIONS
   - "label" must be one of: patient_data, gross_exam, ihc_text, diagnosis,
     diagnostic_basis, differential_diagnosis, knowledge_extension
   - "content" is the verbatim text of that section, transcribed completely
   - Transcribe in reading order; do not invent content that is not printed

4. FIGURE REGIONS
   Each figure region has these fields:
   - "box_2d": [ymin, xmin, ymax, xmax], each coordinate normalised to 0-1000
     relative to the page the figure appears on
   - "page_index": which attached image the region is on, 0-based, in the
     order the images are attached to this request
   - "stain": "he" for H&E stained microscopy, "ihc" for immunohistochemistry
   - "magnification": one of x10, x20, x40, x100, x200, x400, other
   - "description": the printed figure caption, or a one-sentence visual
     description when no caption is printed

5. WHAT TO IGNORE
   - Page headers, footers, and page numbers
   - Figures that are not microscopy or gross-specimen photographs
     (decorative images, publisher logos, tables of contents)"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SectionLabel;

    #[test]
    fn prompt_names_every_section_label() {
        for label in SectionLabel::ALL {
            assert!(
                DEFAULT_SYSTEM_PROMPT.contains(label.as_str()),
                "prompt is missing label {:?}",
                label
            );
        }
    }

    #[test]
    fn prompt_states_bbox_convention() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("[ymin, xmin, ymax, xmax]"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("0-1000"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("page_index"));
    }
}
