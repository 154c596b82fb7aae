//! In-memory state of one pipeline execution.
//!
//! An `AnalysisRun` walks a fixed sequence of states; each transition is
//! checked so a stage can never observe inputs from one that has not
//! finished. Stage outputs are held sealed, exactly as they would be stored.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::crypto::Sealed;
use crate::models::{CategoryCodes, ClinicalNote, CodeCategory, CodeDetail, CodesDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    New,
    Summarizing,
    Summarized,
    Diagnosing,
    Diagnosed,
    Extracting,
    ExtractingPrescriptionDerived,
    ResolvingDetails,
    Assembling,
    Persisted,
    Aborted,
}

impl RunState {
    /// The only state reachable from `self` on success.
    pub fn successor(self) -> Option<RunState> {
        use RunState::*;
        match self {
            New => Some(Summarizing),
            Summarizing => Some(Summarized),
            Summarized => Some(Diagnosing),
            Diagnosing => Some(Diagnosed),
            Diagnosed => Some(Extracting),
            Extracting => Some(ExtractingPrescriptionDerived),
            ExtractingPrescriptionDerived => Some(ResolvingDetails),
            ResolvingDetails => Some(Assembling),
            Assembling => Some(Persisted),
            Persisted | Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Persisted | RunState::Aborted)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RunError {
    #[error("Illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("Stage output missing: {0}")]
    MissingStage(&'static str),

    #[error("Category {0} has not completed")]
    MissingCategory(CodeCategory),
}

#[derive(Debug, Clone)]
pub struct SummaryResult {
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub sealed: Sealed,
}

#[derive(Debug, Clone)]
pub struct DiagnosisResult {
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub sealed: Sealed,
}

/// A category prompt's reply. The reply itself is only persisted for the
/// prescription category; for the others only the extracted codes are kept.
#[derive(Debug, Clone)]
pub struct CategoryReply {
    pub timestamp: DateTime<Utc>,
    pub sealed: Sealed,
    pub codes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub note: ClinicalNote,
    state: RunState,
    summary: Option<SummaryResult>,
    diagnosis: Option<DiagnosisResult>,
    replies: HashMap<CodeCategory, CategoryReply>,
    details: HashMap<CodeCategory, Vec<CodeDetail>>,
}

impl AnalysisRun {
    pub fn new(note: ClinicalNote) -> Self {
        Self {
            note,
            state: RunState::New,
            summary: None,
            diagnosis: None,
            replies: HashMap::new(),
            details: HashMap::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `to`, which must be the successor of the current state.
    pub fn advance(&mut self, to: RunState) -> Result<(), RunError> {
        if self.state.successor() != Some(to) {
            return Err(RunError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(note = %self.note.short_id(), from = ?self.state, to = ?to, "Run state");
        self.state = to;
        Ok(())
    }

    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(note = %self.note.short_id(), from = ?self.state, "Run aborted");
            self.state = RunState::Aborted;
        }
    }

    /// Independent copy of a summarized run for one diagnostic model.
    pub fn fork_for_diagnosis(&self) -> Result<AnalysisRun, RunError> {
        if self.state != RunState::Summarized {
            return Err(RunError::IllegalTransition {
                from: self.state,
                to: RunState::Diagnosing,
            });
        }
        Ok(Self {
            note: self.note.clone(),
            state: RunState::Summarized,
            summary: self.summary.clone(),
            diagnosis: None,
            replies: HashMap::new(),
            details: HashMap::new(),
        })
    }

    pub fn record_summary(&mut self, summary: SummaryResult) -> Result<(), RunError> {
        self.advance(RunState::Summarized)?;
        self.summary = Some(summary);
        Ok(())
    }

    pub fn summary(&self) -> Result<&SummaryResult, RunError> {
        self.summary.as_ref().ok_or(RunError::MissingStage("summary"))
    }

    pub fn record_diagnosis(&mut self, diagnosis: DiagnosisResult) -> Result<(), RunError> {
        self.advance(RunState::Diagnosed)?;
        self.diagnosis = Some(diagnosis);
        Ok(())
    }

    pub fn diagnosis(&self) -> Result<&DiagnosisResult, RunError> {
        self.diagnosis.as_ref().ok_or(RunError::MissingStage("diagnosis"))
    }

    pub fn record_reply(&mut self, category: CodeCategory, reply: CategoryReply) {
        self.replies.insert(category, reply);
    }

    pub fn reply(&self, category: CodeCategory) -> Result<&CategoryReply, RunError> {
        self.replies
            .get(&category)
            .ok_or(RunError::MissingCategory(category))
    }

    pub fn record_details(&mut self, category: CodeCategory, details: Vec<CodeDetail>) {
        self.details.insert(category, details);
    }

    /// Build the codes document. Fails unless every category has replied,
    /// so a partial document cannot be produced.
    pub fn assemble(&self) -> Result<CodesDocument, RunError> {
        if self.state != RunState::Assembling {
            return Err(RunError::IllegalTransition {
                from: self.state,
                to: RunState::Assembling,
            });
        }
        let build = |category: CodeCategory| -> Result<CategoryCodes, RunError> {
            let reply = self.reply(category)?;
            let prescriptions = (category == CodeCategory::Prescription)
                .then(|| reply.sealed.stored_value.clone());
            Ok(CategoryCodes {
                timestamp: reply.timestamp,
                codes: reply.codes.clone(),
                details: self.details.get(&category).cloned().unwrap_or_default(),
                prescriptions,
            })
        };
        Ok(CodesDocument {
            icd: build(CodeCategory::Icd)?,
            cpt: build(CodeCategory::Cpt)?,
            hcpcs: build(CodeCategory::Hcpcs)?,
            prescription: build(CodeCategory::Prescription)?,
            prescription_cpt: build(CodeCategory::PrescriptionCpt)?,
            prescription_hcpcs: build(CodeCategory::PrescriptionHcpcs)?,
        })
    }
}
