//! Typed reads and writes over the persistence gateway.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use super::gateway::{FieldMap, InsertOutcome, PersistenceGateway, StoreError};
use crate::crypto::{CryptoError, SealingGateway};
use crate::models::{
    decode_versioned, AnalysisEntry, ClinicalNote, CodeSystem, DocumentError, FoundDetail,
    NoteEntry, PatientRecord, PayerRate, StoredAnalysisDocument, StoredCodesDocument,
    StoredNoteDocument,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Column {0} missing or not text")]
    MissingColumn(&'static str),

    #[error("Unparsable stored timestamp {0:?}")]
    BadTimestamp(String),
}

/// Fixed-width UTC form so stored timestamps sort lexically.
pub fn storage_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn text(row: &FieldMap, column: &'static str) -> Result<String, RepositoryError> {
    row.get(column)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or(RepositoryError::MissingColumn(column))
}

pub(super) fn optional_text(row: &FieldMap, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(String::from)
}

/// Load one note by its content digest.
pub async fn load_note(
    store: &dyn PersistenceGateway,
    patient_note_id: &str,
) -> Result<Option<ClinicalNote>, RepositoryError> {
    let rows = store
        .query_dicts(
            "SELECT patient_note_id, patient_note FROM patient_notes WHERE patient_note_id = ?1",
            vec![json!(patient_note_id)],
        )
        .await?;
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    let document: StoredNoteDocument = decode_versioned(&text(row, "patient_note")?)?;
    Ok(Some(ClinicalNote::from_document(
        text(row, "patient_note_id")?,
        document,
    )))
}

/// Notes with no analysis record yet, oldest first.
pub async fn pending_note_ids(store: &dyn PersistenceGateway) -> Result<Vec<String>, RepositoryError> {
    let rows = store
        .query_dicts(
            "SELECT patient_note_id FROM patient_notes
             WHERE patient_note_id NOT IN (SELECT patient_note_id FROM analysis_records)
             ORDER BY timestamp, patient_note_id",
            vec![],
        )
        .await?;
    rows.iter().map(|row| text(row, "patient_note_id")).collect()
}

/// Seal and store a note body. Returns the note id (digest of the
/// plaintext) and whether a new row was written.
pub async fn ingest_note(
    store: &dyn PersistenceGateway,
    sealer: &SealingGateway,
    patient_id: &str,
    note_body: &str,
    locality: Option<&str>,
    source: &str,
) -> Result<(String, InsertOutcome), RepositoryError> {
    let sealed = sealer.seal(note_body)?;
    sealer.check_write(&[&sealed]);
    let document = StoredNoteDocument::V1 {
        source: source.to_string(),
        category: "visit_note".into(),
        patient_id: patient_id.to_string(),
        note: sealed.stored_value,
        locality: locality.map(String::from),
    };
    let mut fields = FieldMap::new();
    fields.insert("patient_note_id".into(), json!(sealed.digest));
    fields.insert("patient_id".into(), json!(patient_id));
    fields.insert("timestamp".into(), json!(storage_timestamp(Utc::now())));
    fields.insert(
        "patient_note".into(),
        Value::String(serde_json::to_string(&document).map_err(|source| {
            DocumentError::Malformed {
                kind: "patient note",
                source,
            }
        })?),
    );
    let outcome = store.insert_if_absent("patient_notes", fields).await?;
    tracing::info!(
        note = %crate::models::short_digest(&sealed.digest),
        ?outcome,
        "Note ingested"
    );
    Ok((sealed.digest, outcome))
}

/// Add an entry to the reference dataset used for detail lookups.
pub async fn insert_reference_code(
    store: &dyn PersistenceGateway,
    system: CodeSystem,
    detail: &FoundDetail,
) -> Result<InsertOutcome, RepositoryError> {
    let guidelines = serde_json::to_string(&detail.billing_guidelines).map_err(|source| {
        DocumentError::Malformed {
            kind: "billing guidelines",
            source,
        }
    })?;
    let mut fields = FieldMap::new();
    fields.insert("system".into(), json!(system.as_str()));
    fields.insert("code".into(), json!(detail.code));
    fields.insert("billable".into(), json!(detail.billable));
    fields.insert("short_description".into(), json!(detail.short_description));
    fields.insert("long_description".into(), json!(detail.long_description));
    fields.insert("billing_guidelines".into(), json!(guidelines));
    Ok(store.insert_if_absent("code_reference", fields).await?)
}

/// Look up one code in the reference dataset.
pub async fn find_reference_code(
    store: &dyn PersistenceGateway,
    system: CodeSystem,
    code: &str,
) -> Result<Option<FoundDetail>, RepositoryError> {
    let rows = store
        .query_dicts(
            "SELECT code, billable, short_description, long_description, billing_guidelines
             FROM code_reference WHERE system = ?1 AND code = ?2",
            vec![json!(system.as_str()), json!(code)],
        )
        .await?;
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    let billable = match row.get("billable") {
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
        _ => None,
    };
    let billing_guidelines: std::collections::BTreeMap<String, PayerRate> =
        serde_json::from_str(&text(row, "billing_guidelines")?).map_err(|source| {
            DocumentError::Malformed {
                kind: "billing guidelines",
                source,
            }
        })?;
    Ok(Some(FoundDetail {
        code: text(row, "code")?,
        billable,
        short_description: text(row, "short_description")?,
        long_description: optional_text(row, "long_description").unwrap_or_default(),
        billing_guidelines,
    }))
}

/// Every note with its persisted analyses and codes for one patient.
pub async fn fetch_patient_record(
    store: &dyn PersistenceGateway,
    patient_id: &str,
) -> Result<Option<PatientRecord>, RepositoryError> {
    let note_rows = store
        .query_dicts(
            "SELECT patient_note_id, patient_note FROM patient_notes
             WHERE patient_id = ?1 ORDER BY timestamp, patient_note_id",
            vec![json!(patient_id)],
        )
        .await?;
    if note_rows.is_empty() {
        return Ok(None);
    }

    let mut notes = Vec::with_capacity(note_rows.len());
    for row in &note_rows {
        let note = ClinicalNote::from_document(
            text(row, "patient_note_id")?,
            decode_versioned(&text(row, "patient_note")?)?,
        );
        notes.push(NoteEntry {
            patient_note_id: note.patient_note_id,
            locality: note.locality,
            note: note.stored_note,
        });
    }

    let analysis_rows = store
        .query_dicts(
            "SELECT ar.patient_document_id, ar.patient_note_id, ar.patient_locality, ar.llm,
                    ar.timestamp, ar.analysis_document, cd.codes_document
             FROM analysis_records ar
             LEFT JOIN codes_documents cd
               ON cd.patient_id = ar.patient_id
              AND cd.patient_document_id = ar.patient_document_id
             WHERE ar.patient_id = ?1
             ORDER BY ar.timestamp, ar.patient_document_id",
            vec![json!(patient_id)],
        )
        .await?;

    let mut analyses = Vec::with_capacity(analysis_rows.len());
    for row in &analysis_rows {
        let document: StoredAnalysisDocument = decode_versioned(&text(row, "analysis_document")?)?;
        let codes = match optional_text(row, "codes_document") {
            Some(raw) => Some(decode_versioned::<StoredCodesDocument>(&raw)?.into_current()),
            None => None,
        };
        let raw_ts = text(row, "timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| RepositoryError::BadTimestamp(raw_ts.clone()))?;
        analyses.push(AnalysisEntry {
            patient_document_id: text(row, "patient_document_id")?,
            patient_note_id: text(row, "patient_note_id")?,
            llm: text(row, "llm")?,
            patient_locality: optional_text(row, "patient_locality"),
            timestamp,
            document,
            codes,
        });
    }

    Ok(Some(PatientRecord {
        patient_id: patient_id.to_string(),
        notes,
        analyses,
    }))
}
