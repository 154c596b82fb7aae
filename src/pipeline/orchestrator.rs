//! Stage orchestrator: drives a note through
//! summarize → diagnose (per diagnostic model) → category prompts →
//! prescription-derived prompts → detail resolution → assembly → persistence.
//!
//! An unavailable inference service aborts the run for that diagnostic
//! model with nothing written; sibling models carry on. Every other failure
//! propagates. Free text is sealed the moment it arrives and opened only to
//! build the next prompt or to extract codes.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::codes::extract_codes;
use super::details::{DetailResolver, FallbackLookup, InferenceDetailLookup, ReferenceTableLookup};
use super::inference::{Analysis, InferenceAdapter, InferenceError, InvokeError, OllamaClient};
use super::prompts::{category_prompt, diagnose_prompt, summarize_prompt};
use super::run::{AnalysisRun, CategoryReply, DiagnosisResult, RunError, RunState, SummaryResult};
use crate::config::{PipelineConfig, ServiceConfig};
use crate::crypto::{CryptoError, SealingGateway};
use crate::db::{
    billing_estimate, fetch_patient_record, load_note, pending_note_ids, storage_timestamp, FieldMap, InsertOutcome,
    PendingInsert, PersistenceGateway, RepositoryError, StoreError,
};
use crate::models::{
    short_digest, BillingEstimate, CodeCategory, CodesDocument, PatientRecord, StoredAnalysisDocument,
    StoredCodesDocument, ANALYSIS_CATEGORY, ANALYSIS_SOURCE,
};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Patient note not found: {0}")]
    NoteNotFound(String),

    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    #[error("Patient data encryption failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Inference failed: {0}")]
    Inference(#[source] InferenceError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What happened to one diagnostic model's run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelOutcome {
    Persisted {
        model: String,
        patient_document_id: String,
        /// False when an identical analysis was already stored.
        inserted: bool,
    },
    Aborted {
        model: String,
        stage: String,
    },
}

impl ModelOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteOutcome {
    pub patient_note_id: String,
    pub summarized: bool,
    pub models: Vec<ModelOutcome>,
    pub warnings: Vec<String>,
}

impl NoteOutcome {
    /// True only when the summary and every diagnostic model's run landed.
    pub fn succeeded(&self) -> bool {
        self.summarized && !self.models.is_empty() && self.models.iter().all(ModelOutcome::is_persisted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub notes: Vec<NoteOutcome>,
    /// Note at which the batch stopped because its run aborted.
    pub stopped_at: Option<String>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.stopped_at.is_none()
    }
}

/// Fan-in for a set of concurrently dispatched calls. Waits for every
/// outcome; any `Unavailable` aborts (`None`), otherwise the first hard
/// failure propagates.
fn settle(results: Vec<Result<Analysis, InvokeError>>) -> Result<Option<Vec<Analysis>>, PipelineError> {
    if results
        .iter()
        .any(|r| matches!(r, Err(InvokeError::Unavailable(_))))
    {
        return Ok(None);
    }
    let mut analyses = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(analysis) => analyses.push(analysis),
            Err(InvokeError::Failed(e)) => return Err(PipelineError::Inference(e)),
            Err(InvokeError::Unavailable(_)) => return Ok(None),
        }
    }
    Ok(Some(analyses))
}

fn single(result: Result<Analysis, InvokeError>) -> Result<Option<Analysis>, PipelineError> {
    Ok(settle(vec![result])?.and_then(|mut v| v.pop()))
}

pub struct CodingPipeline {
    adapter: InferenceAdapter,
    sealer: Arc<SealingGateway>,
    store: Arc<dyn PersistenceGateway>,
    resolver: DetailResolver,
    config: PipelineConfig,
}

impl CodingPipeline {
    pub fn new(
        adapter: InferenceAdapter,
        sealer: Arc<SealingGateway>,
        store: Arc<dyn PersistenceGateway>,
        resolver: DetailResolver,
        config: PipelineConfig,
    ) -> Self {
        Self {
            adapter,
            sealer,
            store,
            resolver,
            config,
        }
    }

    /// Wire the production pipeline: Ollama transport, key-file sealing and
    /// a reference-table-then-model detail lookup.
    pub fn from_config(
        config: &ServiceConfig,
        store: Arc<dyn PersistenceGateway>,
    ) -> Result<Self, PipelineError> {
        let client = OllamaClient::new(&config.inference).map_err(PipelineError::Inference)?;
        let adapter = InferenceAdapter::new(Arc::new(client), &config.inference);
        let sealer = Arc::new(SealingGateway::from_config(&config.encryption)?);
        let lookup = FallbackLookup::new(
            Arc::new(ReferenceTableLookup::new(store.clone())),
            Arc::new(InferenceDetailLookup::new(
                adapter.clone(),
                config.pipeline.lookup_model.clone(),
            )),
        );
        let resolver = DetailResolver::new(
            Arc::new(lookup),
            config.pipeline.detail_max_in_flight,
            config.pipeline.lookup_timeout,
        );
        Ok(Self::new(
            adapter,
            sealer,
            store,
            resolver,
            config.pipeline.clone(),
        ))
    }

    pub fn sealer(&self) -> &SealingGateway {
        &self.sealer
    }

    pub fn store(&self) -> &Arc<dyn PersistenceGateway> {
        &self.store
    }

    /// Analyze one note with the summarizer and every diagnostic model.
    pub async fn analyze_note(&self, patient_note_id: &str) -> Result<NoteOutcome, PipelineError> {
        let note = load_note(self.store.as_ref(), patient_note_id)
            .await?
            .ok_or_else(|| PipelineError::NoteNotFound(patient_note_id.to_string()))?;
        let mut run = AnalysisRun::new(note);
        let mut outcome = NoteOutcome {
            patient_note_id: patient_note_id.to_string(),
            summarized: false,
            models: Vec::new(),
            warnings: Vec::new(),
        };
        tracing::info!(note = %run.note.short_id(), "Analyzing note");

        run.advance(RunState::Summarizing)?;
        let reply = {
            let body = self.sealer.open(&run.note.stored_note)?;
            let prompt = summarize_prompt(&body);
            single(self.adapter.invoke(&self.config.summarizer_model, &prompt).await)?
        };
        let Some(analysis) = reply else {
            run.abort();
            tracing::error!(note = %run.note.short_id(), "Summarization aborted: inference unavailable");
            return Ok(outcome);
        };
        let summary = SummaryResult {
            model: self.config.summarizer_model.clone(),
            timestamp: analysis.timestamp,
            sealed: self.sealer.seal(&analysis.text)?,
        };
        drop(analysis);
        run.record_summary(summary)?;
        outcome.summarized = true;

        for model in &self.config.diagnostic_models {
            let fork = run.fork_for_diagnosis()?;
            let (model_outcome, warning) = self.run_diagnostic_model(fork, model).await?;
            if let Some(warning) = warning {
                if !outcome.warnings.iter().any(|w| w == warning) {
                    outcome.warnings.push(warning.to_string());
                }
            }
            outcome.models.push(model_outcome);
        }

        tracing::info!(
            note = %run.note.short_id(),
            succeeded = outcome.succeeded(),
            "Note analysis finished"
        );
        Ok(outcome)
    }

    /// Analyze every note that has no analysis record yet, one at a time.
    /// Stops at the first note whose run aborts.
    pub async fn analyze_all_pending(&self) -> Result<BatchOutcome, PipelineError> {
        let pending = pending_note_ids(self.store.as_ref()).await?;
        tracing::info!(count = pending.len(), "Analyzing pending notes");
        let mut batch = BatchOutcome {
            notes: Vec::with_capacity(pending.len()),
            stopped_at: None,
        };
        for note_id in pending {
            let outcome = self.analyze_note(&note_id).await?;
            let succeeded = outcome.succeeded();
            batch.notes.push(outcome);
            if !succeeded {
                tracing::error!(note = %short_digest(&note_id), "Batch stopped: note analysis aborted");
                batch.stopped_at = Some(note_id);
                break;
            }
        }
        Ok(batch)
    }

    /// Stored notes, analyses and codes for one patient.
    pub async fn fetch_record(&self, patient_id: &str) -> Result<PatientRecord, PipelineError> {
        fetch_patient_record(self.store.as_ref(), patient_id)
            .await?
            .ok_or_else(|| PipelineError::PatientNotFound(patient_id.to_string()))
    }

    /// ICD billable estimates and locality-priced procedures for every
    /// stored analysis of one patient.
    pub async fn estimate_billing(&self, patient_id: &str) -> Result<BillingEstimate, PipelineError> {
        billing_estimate(self.store.as_ref(), patient_id)
            .await?
            .ok_or_else(|| PipelineError::PatientNotFound(patient_id.to_string()))
    }

    async fn run_diagnostic_model(
        &self,
        mut run: AnalysisRun,
        model: &str,
    ) -> Result<(ModelOutcome, Option<&'static str>), PipelineError> {
        match self.drive(&mut run, model).await? {
            Some(persisted) => Ok(persisted),
            None => {
                let stage = format!("{:?}", run.state());
                run.abort();
                tracing::error!(
                    note = %run.note.short_id(),
                    model = %model,
                    stage = %stage,
                    "Run aborted: inference unavailable"
                );
                Ok((
                    ModelOutcome::Aborted {
                        model: model.to_string(),
                        stage,
                    },
                    None,
                ))
            }
        }
    }

    /// Diagnose through persist. `None` means the service became unavailable.
    async fn drive(
        &self,
        run: &mut AnalysisRun,
        model: &str,
    ) -> Result<Option<(ModelOutcome, Option<&'static str>)>, PipelineError> {
        run.advance(RunState::Diagnosing)?;
        let reply = {
            let summary = self.sealer.open(&run.summary()?.sealed.stored_value)?;
            let prompt = diagnose_prompt(&summary);
            single(self.adapter.invoke(model, &prompt).await)?
        };
        let Some(analysis) = reply else {
            return Ok(None);
        };
        let diagnosis = DiagnosisResult {
            model: model.to_string(),
            timestamp: analysis.timestamp,
            sealed: self.sealer.seal(&analysis.text)?,
        };
        drop(analysis);
        tracing::info!(
            note = %run.note.short_id(),
            model = %model,
            analysis = %short_digest(&diagnosis.sealed.digest),
            "Diagnosis received"
        );
        run.record_diagnosis(diagnosis)?;

        run.advance(RunState::Extracting)?;
        let primary = [
            CodeCategory::Icd,
            CodeCategory::Cpt,
            CodeCategory::Hcpcs,
            CodeCategory::Prescription,
        ];
        let replies = {
            let diagnosis = self.sealer.open(&run.diagnosis()?.sealed.stored_value)?;
            self.fan_out(model, &primary, &diagnosis).await?
        };
        let Some(replies) = replies else {
            return Ok(None);
        };
        for (category, reply) in replies {
            run.record_reply(category, reply);
        }

        run.advance(RunState::ExtractingPrescriptionDerived)?;
        let derived = [CodeCategory::PrescriptionCpt, CodeCategory::PrescriptionHcpcs];
        let replies = {
            let prescriptions =
                self.sealer.open(&run.reply(CodeCategory::Prescription)?.sealed.stored_value)?;
            self.fan_out(model, &derived, &prescriptions).await?
        };
        let Some(replies) = replies else {
            return Ok(None);
        };
        for (category, reply) in replies {
            run.record_reply(category, reply);
        }

        run.advance(RunState::ResolvingDetails)?;
        self.resolve_all(run).await?;

        run.advance(RunState::Assembling)?;
        let codes = run.assemble()?;

        let (outcome, warning) = self.persist(run, codes).await?;
        run.advance(RunState::Persisted)?;
        let diagnosis = run.diagnosis()?;
        Ok(Some((
            ModelOutcome::Persisted {
                model: model.to_string(),
                patient_document_id: diagnosis.sealed.digest.clone(),
                inserted: outcome == InsertOutcome::Inserted,
            },
            warning,
        )))
    }

    /// Dispatch one prompt per category concurrently and wait for all of
    /// them. The stage does not start if the service fails its probe.
    async fn fan_out(
        &self,
        model: &str,
        categories: &[CodeCategory],
        input: &str,
    ) -> Result<Option<Vec<(CodeCategory, CategoryReply)>>, PipelineError> {
        match self.adapter.probe().await {
            Ok(()) => {}
            Err(InvokeError::Unavailable(_)) => return Ok(None),
            Err(InvokeError::Failed(e)) => return Err(PipelineError::Inference(e)),
        }

        let prompts: Vec<_> = categories
            .iter()
            .map(|category| {
                category_prompt(
                    *category,
                    model,
                    &self.config.prescription_cpt_reuse_models,
                    input,
                )
            })
            .collect();
        let results = join_all(prompts.iter().map(|prompt| self.adapter.invoke(model, prompt))).await;
        drop(prompts);

        let Some(analyses) = settle(results)? else {
            return Ok(None);
        };
        let mut replies = Vec::with_capacity(analyses.len());
        for (category, analysis) in categories.iter().zip(analyses) {
            replies.push((*category, self.seal_reply(*category, analysis)?));
        }
        Ok(Some(replies))
    }

    /// Seal a category reply and extract its codes from the opened text.
    fn seal_reply(&self, category: CodeCategory, analysis: Analysis) -> Result<CategoryReply, PipelineError> {
        let timestamp = analysis.timestamp;
        let sealed = self.sealer.seal(&analysis.text)?;
        drop(analysis);
        let codes = match category.code_system() {
            Some(system) => {
                let text = self.sealer.open(&sealed.stored_value)?;
                extract_codes(system, &text)
            }
            None => Vec::new(),
        };
        Ok(CategoryReply {
            timestamp,
            sealed,
            codes,
        })
    }

    /// Resolve details for every coded category concurrently.
    async fn resolve_all(&self, run: &mut AnalysisRun) -> Result<(), PipelineError> {
        let mut pending = Vec::new();
        for category in CodeCategory::ALL {
            if let Some(system) = category.code_system() {
                pending.push((category, system, run.reply(category)?.codes.clone()));
            }
        }
        let resolved = join_all(pending.iter().map(|(category, system, codes)| async move {
            (*category, self.resolver.resolve_details(*system, codes).await)
        }))
        .await;
        for (category, details) in resolved {
            run.record_details(category, details);
        }
        Ok(())
    }

    /// Write the analysis record and its codes document together. An
    /// analysis whose digest is already stored is left untouched.
    async fn persist(
        &self,
        run: &AnalysisRun,
        codes: CodesDocument,
    ) -> Result<(InsertOutcome, Option<&'static str>), PipelineError> {
        let summary = run.summary()?;
        let diagnosis = run.diagnosis()?;
        let prescription = run.reply(CodeCategory::Prescription)?;
        let record_id = diagnosis.sealed.digest.clone();

        let existing = self
            .store
            .query_dicts(
                "SELECT patient_id FROM analysis_records WHERE patient_document_id = ?1",
                vec![json!(record_id)],
            )
            .await?;
        if let Some(row) = existing.first() {
            let same_patient = row.get("patient_id").and_then(Value::as_str) == Some(run.note.patient_id.as_str());
            tracing::info!(
                note = %run.note.short_id(),
                analysis = %short_digest(&record_id),
                same_patient,
                "Analysis already stored, skipping write"
            );
            return Ok((InsertOutcome::AlreadyPresent, None));
        }

        let document = StoredAnalysisDocument::V4 {
            llm: diagnosis.model.clone(),
            summarizer_llm: summary.model.clone(),
            source: ANALYSIS_SOURCE.into(),
            category: ANALYSIS_CATEGORY.into(),
            patient_id: run.note.patient_id.clone(),
            patient_note_id: run.note.patient_note_id.clone(),
            osce_note_summarized: summary.sealed.stored_value.clone(),
            analysis_document: diagnosis.sealed.stored_value.clone(),
        };

        let mut record = FieldMap::new();
        record.insert("patient_document_id".into(), json!(record_id));
        record.insert("patient_id".into(), json!(run.note.patient_id));
        record.insert("patient_note_id".into(), json!(run.note.patient_note_id));
        record.insert("patient_locality".into(), json!(run.note.locality));
        record.insert("llm".into(), json!(diagnosis.model));
        record.insert("timestamp".into(), json!(storage_timestamp(diagnosis.timestamp)));
        record.insert("analysis_document".into(), json!(serde_json::to_string(&document)?));

        let mut codes_row = FieldMap::new();
        codes_row.insert("patient_id".into(), json!(run.note.patient_id));
        codes_row.insert("patient_document_id".into(), json!(record_id));
        codes_row.insert("timestamp".into(), json!(storage_timestamp(Utc::now())));
        codes_row.insert(
            "codes_document".into(),
            json!(serde_json::to_string(&StoredCodesDocument::V1(codes))?),
        );

        let warning = self
            .sealer
            .check_write(&[&summary.sealed, &diagnosis.sealed, &prescription.sealed]);
        let outcomes = self
            .store
            .insert_all_if_absent(vec![
                PendingInsert {
                    table: "analysis_records",
                    fields: record,
                },
                PendingInsert {
                    table: "codes_documents",
                    fields: codes_row,
                },
            ])
            .await?;
        let outcome = outcomes.first().copied().unwrap_or(InsertOutcome::AlreadyPresent);
        tracing::info!(
            note = %run.note.short_id(),
            model = %diagnosis.model,
            analysis = %short_digest(&record_id),
            ?outcome,
            "Analysis persisted"
        );
        Ok((outcome, warning))
    }
}
