//! Medicare fee schedule reference rows and the billing estimates built
//! from them and from stored codes documents.

use serde::{Deserialize, Serialize};

/// Payer roles read from a detail's billing guidelines.
pub const MEDICAL_PROVIDER: &str = "medical_provider";
pub const INSURANCE_COMPANY: &str = "insurance_company";

/// Price of one procedure code in one MAC locality. `hcpc` holds CPT and
/// HCPCS codes alike; an unmodified price has an empty `modifier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeScheduleEntry {
    pub hcpc: String,
    #[serde(default)]
    pub modifier: String,
    pub locality: String,
    #[serde(default)]
    pub short_description: String,
    pub facility_price: Option<f64>,
    pub non_facility_price: Option<f64>,
    pub facility_limiting_charge: Option<f64>,
    pub non_facility_limiting_charge: Option<f64>,
    pub conv_fact: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicareLocality {
    pub mac: String,
    pub locality_number: String,
    pub state: String,
    pub fee_schedule_area: String,
    #[serde(default)]
    pub counties: String,
}

/// One ICD code from one stored analysis with what its detail says about
/// billing. Placeholder details leave everything but the code empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IcdBillableEstimate {
    pub patient_document_id: String,
    pub code: String,
    pub billable: Option<bool>,
    pub short_description: Option<String>,
    pub medical_provider_reimbursement_rate: Option<f64>,
    pub insurance_company_reimbursement_rate: Option<f64>,
    pub patient_locality: Option<String>,
}

/// Procedure codes of one analysis and the locality they are priced in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientLocalityCodes {
    pub patient_id: String,
    pub patient_document_id: String,
    pub locality: Option<String>,
    pub codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcedureCost {
    pub code: String,
    /// Empty when the code has no price in the locality.
    pub fees: Vec<FeeScheduleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisCosts {
    pub patient_document_id: String,
    pub locality: Option<String>,
    /// Fee schedule areas registered under the locality number.
    pub fee_schedule_areas: Vec<String>,
    pub procedures: Vec<ProcedureCost>,
}

impl AnalysisCosts {
    /// Lowest non-facility total across procedures, taking the cheapest
    /// modifier of each. Unpriced procedures add nothing.
    pub fn non_facility_total(&self) -> f64 {
        self.procedures
            .iter()
            .filter_map(|p| {
                p.fees
                    .iter()
                    .filter_map(|f| f.non_facility_price)
                    .min_by(f64::total_cmp)
            })
            .sum()
    }
}

/// Billing forecast for every stored analysis of one patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingEstimate {
    pub patient_id: String,
    pub icd: Vec<IcdBillableEstimate>,
    pub analyses: Vec<AnalysisCosts>,
}
