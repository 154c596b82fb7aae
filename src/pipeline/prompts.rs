//! Prompt text for every stage. Inputs are appended verbatim to a fixed
//! question; the resulting strings carry clinical text and are zeroized on
//! drop.

use zeroize::Zeroizing;

use crate::models::{CodeCategory, CodeSystem};

pub const SUMMARIZE_PROMPT: &str = "What disease does this patient have? P is patient, D is Doctor";
pub const DIAGNOSE_PROMPT: &str = "Diagnose this patient: ";

pub fn summarize_prompt(note: &str) -> Zeroizing<String> {
    Zeroizing::new(format!("{SUMMARIZE_PROMPT}{note}"))
}

pub fn diagnose_prompt(summary: &str) -> Zeroizing<String> {
    Zeroizing::new(format!("{DIAGNOSE_PROMPT}{summary}"))
}

/// Question used for `category` when run by `model`. Models listed in
/// `reuse_models` ask the prescription question in the prescription_cpt
/// stage as well.
pub fn category_prefix(category: CodeCategory, model: &str, reuse_models: &[String]) -> &'static str {
    if category == CodeCategory::PrescriptionCpt && reuse_models.iter().any(|m| m == model) {
        return CodeCategory::Prescription.prompt_prefix();
    }
    category.prompt_prefix()
}

pub fn category_prompt(
    category: CodeCategory,
    model: &str,
    reuse_models: &[String],
    input: &str,
) -> Zeroizing<String> {
    Zeroizing::new(format!("{}{input}", category_prefix(category, model, reuse_models)))
}

/// Per-code detail question for the lookup model. Contains only the code.
pub fn detail_lookup_prompt(system: CodeSystem, code: &str) -> String {
    let label = match system {
        CodeSystem::Icd10 => "ICD-10",
        CodeSystem::Cpt => "CPT",
        CodeSystem::Hcpcs => "HCPCS",
    };
    format!(
        "Explain {label} code {code}. Respond with JSON only. Key code is the code number, \
         billable is true or false, details is a dictionary with nested keys short_description \
         and long_description. JSON template {{\"code\": \"actual {label} code\", \"billable\": true, \
         \"details\": {{\"short_description\": \"short description goes here\", \
         \"long_description\": \"long description goes here\"}}}}"
    )
}
