//! Analysis triggers.
//!
//! `GET /api/v1/analyze-visit-notes` runs every pending note;
//! `GET /api/v1/analyze-visit-note?visit_note_id=` runs one. Both answer
//! 502 when a run aborted because the inference service went away.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::pipeline::{ModelOutcome, NoteOutcome};

#[derive(Deserialize)]
pub struct VisitNoteQuery {
    pub visit_note_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub message: &'static str,
    pub notes_analyzed: usize,
    pub models: Vec<ModelOutcome>,
    /// Carries the plaintext-storage warning when encryption is disabled.
    pub warnings: Vec<String>,
}

fn collect(notes: &[NoteOutcome]) -> (Vec<ModelOutcome>, Vec<String>) {
    let mut models = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    for note in notes {
        models.extend(note.models.iter().cloned());
        for warning in &note.warnings {
            if !warnings.contains(warning) {
                warnings.push(warning.clone());
            }
        }
    }
    (models, warnings)
}

pub async fn analyze_all(State(ctx): State<ApiContext>) -> Result<Json<AnalysisResponse>, ApiError> {
    let batch = ctx.pipeline.analyze_all_pending().await?;
    if !batch.succeeded() {
        return Err(ApiError::InferenceUnavailable);
    }
    let (models, warnings) = collect(&batch.notes);
    Ok(Json(AnalysisResponse {
        message: "analyze_visit_notes completed",
        notes_analyzed: batch.notes.len(),
        models,
        warnings,
    }))
}

pub async fn analyze_one(
    State(ctx): State<ApiContext>,
    Query(query): Query<VisitNoteQuery>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let note_id = query
        .visit_note_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("visit_note_id is required".into()))?;
    let outcome = ctx.pipeline.analyze_note(note_id.trim()).await?;
    if !outcome.succeeded() {
        return Err(ApiError::InferenceUnavailable);
    }
    let (models, warnings) = collect(std::slice::from_ref(&outcome));
    Ok(Json(AnalysisResponse {
        message: "analyze_visit_note completed",
        notes_analyzed: 1,
        models,
        warnings,
    }))
}
