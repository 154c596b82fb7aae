use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codes::CodesDocument;
use super::Versioned;

pub const ANALYSIS_SOURCE: &str = "healthcare";
pub const ANALYSIS_CATEGORY: &str = "patient";

/// JSON document stored in `analysis_records.analysis_document`.
///
/// Both narrative fields hold sealed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema_version")]
pub enum StoredAnalysisDocument {
    #[serde(rename = "4")]
    V4 {
        llm: String,
        summarizer_llm: String,
        source: String,
        category: String,
        patient_id: String,
        patient_note_id: String,
        osce_note_summarized: String,
        analysis_document: String,
    },
}

impl Versioned for StoredAnalysisDocument {
    const KIND: &'static str = "analysis";
    const SUPPORTED: &'static [&'static str] = &["4"];
}

/// One persisted analysis with its codes, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisEntry {
    pub patient_document_id: String,
    pub patient_note_id: String,
    pub llm: String,
    pub patient_locality: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub document: StoredAnalysisDocument,
    pub codes: Option<CodesDocument>,
}

/// A stored note reference; the body stays sealed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteEntry {
    pub patient_note_id: String,
    pub locality: Option<String>,
    pub note: String,
}

/// Everything stored for one patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub notes: Vec<NoteEntry>,
    pub analyses: Vec<AnalysisEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{decode_versioned, DocumentError};

    #[test]
    fn v4_round_trip_through_versioned_decode() {
        let doc = StoredAnalysisDocument::V4 {
            llm: "medllama2".into(),
            summarizer_llm: "phi4".into(),
            source: ANALYSIS_SOURCE.into(),
            category: ANALYSIS_CATEGORY.into(),
            patient_id: "p-9".into(),
            patient_note_id: "n".into(),
            osce_note_summarized: "sealed-summary".into(),
            analysis_document: "sealed-diagnosis".into(),
        };
        let raw = serde_json::to_string(&doc).unwrap();
        assert!(raw.contains(r#""schema_version":"4""#));
        assert_eq!(decode_versioned::<StoredAnalysisDocument>(&raw).unwrap(), doc);
    }

    #[test]
    fn older_layout_is_not_guessed() {
        let raw = r#"{"schema_version":"3","llm":"medllama2","analysis":"x"}"#;
        assert!(matches!(
            decode_versioned::<StoredAnalysisDocument>(raw),
            Err(DocumentError::UnsupportedVersion { kind: "analysis", .. })
        ));
    }
}
