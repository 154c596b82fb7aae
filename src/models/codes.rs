use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::CodeCategory;
use super::Versioned;

pub const NOT_FOUND_DETAILS: &str = "no data found";

/// Reimbursement figure for one payer role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerRate {
    pub reimbursement_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundDetail {
    pub code: String,
    pub billable: Option<bool>,
    pub short_description: String,
    #[serde(default)]
    pub long_description: String,
    /// Keyed by payer role, e.g. `medical_provider`, `insurance_company`.
    #[serde(default)]
    pub billing_guidelines: BTreeMap<String, PayerRate>,
}

/// Descriptive and billing metadata for one extracted code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeDetail {
    Found(FoundDetail),
    NotFound { code: String, details: String },
}

impl CodeDetail {
    pub fn not_found(code: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            details: NOT_FOUND_DETAILS.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Found(found) => &found.code,
            Self::NotFound { code, .. } => code,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Output of one prompt category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCodes {
    pub timestamp: DateTime<Utc>,
    pub codes: Vec<String>,
    pub details: Vec<CodeDetail>,
    /// Sealed prescription narrative; only the `prescription` category
    /// carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescriptions: Option<String>,
}

impl CategoryCodes {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            codes: Vec::new(),
            details: Vec::new(),
            prescriptions: None,
        }
    }
}

/// Every category's codes for one analysis. All six fields are required,
/// so a document with a missing category cannot be built or decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodesDocument {
    pub icd: CategoryCodes,
    pub cpt: CategoryCodes,
    pub hcpcs: CategoryCodes,
    pub prescription: CategoryCodes,
    pub prescription_cpt: CategoryCodes,
    pub prescription_hcpcs: CategoryCodes,
}

impl CodesDocument {
    pub fn get(&self, category: CodeCategory) -> &CategoryCodes {
        match category {
            CodeCategory::Icd => &self.icd,
            CodeCategory::Cpt => &self.cpt,
            CodeCategory::Hcpcs => &self.hcpcs,
            CodeCategory::Prescription => &self.prescription,
            CodeCategory::PrescriptionCpt => &self.prescription_cpt,
            CodeCategory::PrescriptionHcpcs => &self.prescription_hcpcs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema_version")]
pub enum StoredCodesDocument {
    #[serde(rename = "1")]
    V1(CodesDocument),
}

impl Versioned for StoredCodesDocument {
    const KIND: &'static str = "codes";
    const SUPPORTED: &'static [&'static str] = &["1"];
}

impl StoredCodesDocument {
    pub fn into_current(self) -> CodesDocument {
        match self {
            Self::V1(doc) => doc,
        }
    }
}
