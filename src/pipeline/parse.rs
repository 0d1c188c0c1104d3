//! Response parsing: tolerant cleanup and decoding of the model's case payload.
//!
//! ## Why is cleanup necessary?
//!
//! Even well-prompted vision models occasionally disobey the output contract
//! in ways that are *semantically fine* but *structurally invalid* — wrapping
//! the JSON in ` ```json … ``` ` fences, prefixing a sentence of commentary,
//! or emitting enum values just outside the contract ("40×" instead of
//! "x40"). This module absorbs those quirks deterministically so the prompt
//! stays focused on *what to extract*, not on formatting edge-cases.
//!
//! Contract enforcement follows the extraction-service boundary rules:
//! a magnification outside the enumeration coerces to `other`; a stain or
//! section label outside its enumeration has no fallback bucket, so the
//! offending region or section is dropped with a warning. An empty case
//! array is a valid response — pages with no diagnosable content are
//! expected, not an error.

use crate::error::HistocaseError;
use crate::model::{Magnification, SectionLabel, StainType};
use crate::pipeline::crop::BoundingBox;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use tracing::warn;

// ── Wire types (exactly what the model emits) ────────────────────────────

/// One case object as the model emits it, before contract enforcement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireCase {
    #[serde(default, deserialize_with = "string_or_number")]
    pub chapter_num: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub case_num: Option<String>,
    #[serde(default)]
    pub organ: String,
    #[serde(default)]
    pub sections: Vec<WireSection>,
    #[serde(default)]
    pub figures: Vec<WireFigure>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireSection {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireFigure {
    /// `[ymin, xmin, ymax, xmax]`, nominally 0–1000. Accepted as floats so
    /// fractional or negative model output doesn't fail the whole chunk.
    #[serde(default)]
    pub box_2d: Option<Vec<f64>>,
    /// Which attached image the region is on, 0-based within the request.
    #[serde(default)]
    pub page_index: Option<usize>,
    #[serde(default)]
    pub stain: String,
    #[serde(default)]
    pub magnification: String,
    #[serde(default)]
    pub description: String,
}

/// Accept `"3"`, `3`, or `3.0` for chapter/case numbers; anything else is None.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

// ── Parsed types (contract-enforced) ─────────────────────────────────────

/// A case after enumeration enforcement, ready for the orchestrator.
#[derive(Debug, Clone)]
pub struct ParsedCase {
    pub chapter_num: Option<String>,
    pub case_num: Option<String>,
    pub organ: String,
    pub sections: Vec<ParsedSection>,
    pub figures: Vec<ParsedFigure>,
}

#[derive(Debug, Clone)]
pub struct ParsedSection {
    pub label: SectionLabel,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ParsedFigure {
    pub bbox: BoundingBox,
    pub page_index: Option<usize>,
    pub stain: StainType,
    pub magnification: Magnification,
    pub description: String,
}

// ── Payload extraction ───────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\n(.*)\n```\s*$").unwrap());

/// Locate the JSON array inside the raw model output.
///
/// Strips outer code fences first, then falls back to the outermost
/// `[` … `]` span so a sentence of stray commentary doesn't fail the chunk.
fn extract_json_payload(raw: &str) -> Result<&str, HistocaseError> {
    let trimmed = raw.trim();
    let unfenced = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(trimmed),
        None => trimmed,
    };
    let unfenced = unfenced.trim();
    if unfenced.starts_with('[') {
        return Ok(unfenced);
    }
    match (unfenced.find('['), unfenced.rfind(']')) {
        (Some(start), Some(end)) if start < end => Ok(&unfenced[start..=end]),
        _ => Err(HistocaseError::ResponseParseFailed {
            detail: format!(
                "no JSON array found in response ({} bytes)",
                unfenced.len()
            ),
        }),
    }
}

/// Parse the raw model output into contract-enforced cases.
pub fn parse_cases(raw: &str) -> Result<Vec<ParsedCase>, HistocaseError> {
    let payload = extract_json_payload(raw)?;
    let wire: Vec<WireCase> =
        serde_json::from_str(payload).map_err(|e| HistocaseError::ResponseParseFailed {
            detail: e.to_string(),
        })?;
    Ok(wire.into_iter().map(enforce_case).collect())
}

/// Apply enumeration enforcement to one wire case.
fn enforce_case(wire: WireCase) -> ParsedCase {
    let sections = wire
        .sections
        .into_iter()
        .filter_map(|s| match SectionLabel::parse_lenient(&s.label) {
            Some(label) => Some(ParsedSection {
                label,
                content: s.content,
            }),
            None => {
                warn!("Dropping section with unknown label {:?}", s.label);
                None
            }
        })
        .collect();

    let figures = wire.figures.into_iter().filter_map(enforce_figure).collect();

    ParsedCase {
        chapter_num: wire.chapter_num,
        case_num: wire.case_num,
        organ: wire.organ,
        sections,
        figures,
    }
}

fn enforce_figure(wire: WireFigure) -> Option<ParsedFigure> {
    let coords = match wire.box_2d {
        Some(ref c) if c.len() == 4 => c,
        _ => {
            warn!("Dropping figure region without a 4-element box_2d");
            return None;
        }
    };
    let stain = match StainType::parse_lenient(&wire.stain) {
        Some(stain) => stain,
        None => {
            warn!("Dropping figure region with unknown stain {:?}", wire.stain);
            return None;
        }
    };

    let clamp = |v: f64| -> u32 { v.round().clamp(0.0, 1000.0) as u32 };
    let bbox = BoundingBox::new(
        clamp(coords[0]),
        clamp(coords[1]),
        clamp(coords[2]),
        clamp(coords[3]),
    );

    Some(ParsedFigure {
        bbox,
        page_index: wire.page_index,
        stain,
        magnification: Magnification::parse_lenient(&wire.magnification),
        description: wire.description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
      {
        "chapter_num": 7,
        "case_num": "3",
        "organ": "stomach",
        "sections": [
          {"label": "patient_data", "content": "62-year-old male"},
          {"label": "diagnosis", "content": "GIST"},
          {"label": "figure caption", "content": "dropped"}
        ],
        "figures": [
          {"box_2d": [100, 100, 500, 500], "page_index": 0,
           "stain": "H&E", "magnification": "40x", "description": "spindle cells"},
          {"box_2d": [0, 0, 200, 200], "page_index": 1,
           "stain": "trichrome", "magnification": "x10", "description": "dropped"},
          {"page_index": 0, "stain": "ihc", "magnification": "x20", "description": "no box"}
        ]
      }
    ]"#;

    #[test]
    fn parses_and_enforces_contract() {
        let cases = parse_cases(SAMPLE).unwrap();
        assert_eq!(cases.len(), 1);
        let case = &cases[0];
        assert_eq!(case.chapter_num.as_deref(), Some("7"));
        assert_eq!(case.case_num.as_deref(), Some("3"));
        // Unknown label dropped.
        assert_eq!(case.sections.len(), 2);
        // Unknown stain and missing box both dropped.
        assert_eq!(case.figures.len(), 1);
        assert_eq!(case.figures[0].stain, StainType::He);
        assert_eq!(case.figures[0].magnification, Magnification::X40);
    }

    #[test]
    fn empty_array_is_not_an_error() {
        assert!(parse_cases("[]").unwrap().is_empty());
        assert!(parse_cases("  []  ").unwrap().is_empty());
    }

    #[test]
    fn fenced_payload_is_unwrapped() {
        let fenced = format!("```json\n{}\n```", SAMPLE);
        assert_eq!(parse_cases(&fenced).unwrap().len(), 1);
    }

    #[test]
    fn leading_commentary_is_skipped() {
        let noisy = format!("Here are the extracted cases:\n{}", SAMPLE);
        assert_eq!(parse_cases(&noisy).unwrap().len(), 1);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_cases("the page is blank"),
            Err(HistocaseError::ResponseParseFailed { .. })
        ));
        assert!(matches!(
            parse_cases("[{not json}]"),
            Err(HistocaseError::ResponseParseFailed { .. })
        ));
    }

    #[test]
    fn out_of_range_box_coordinates_clamp() {
        let raw = r#"[{"sections": [], "figures": [
          {"box_2d": [-50, 0, 1500, 999.6], "stain": "he",
           "magnification": "oil immersion", "description": ""}
        ]}]"#;
        let cases = parse_cases(raw).unwrap();
        let figure = &cases[0].figures[0];
        assert_eq!(figure.bbox.ymin, 0);
        assert_eq!(figure.bbox.ymax, 1000);
        assert_eq!(figure.bbox.xmax, 1000);
        assert_eq!(figure.magnification, Magnification::Other);
        assert_eq!(figure.page_index, None);
    }
}
