use serde::{Deserialize, Serialize};

use super::Versioned;

/// JSON document stored in `patient_notes.patient_note`.
///
/// `note` holds the sealed note body: ciphertext text form when encryption
/// is enabled, otherwise the plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema_version")]
pub enum StoredNoteDocument {
    #[serde(rename = "1")]
    V1 {
        source: String,
        category: String,
        patient_id: String,
        note: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locality: Option<String>,
    },
}

impl Versioned for StoredNoteDocument {
    const KIND: &'static str = "patient note";
    const SUPPORTED: &'static [&'static str] = &["1"];
}

/// A clinical note as the pipeline sees it. Read-only to the core.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalNote {
    /// SHA-512 digest of the note plaintext.
    pub patient_note_id: String,
    pub patient_id: String,
    pub locality: Option<String>,
    pub stored_note: String,
}

impl ClinicalNote {
    pub fn from_document(patient_note_id: String, document: StoredNoteDocument) -> Self {
        match document {
            StoredNoteDocument::V1 {
                patient_id,
                note,
                locality,
                ..
            } => Self {
                patient_note_id,
                patient_id,
                locality,
                stored_note: note,
            },
        }
    }

    /// First characters of the note id, for log lines.
    pub fn short_id(&self) -> &str {
        short_digest(&self.patient_note_id)
    }
}

/// Truncate a hex digest for logging.
pub fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}
