//! `GET /api/v1/get-patient/:patient_id`: stored notes, analyses and codes.
//! Narrative fields are returned exactly as stored.
//!
//! `GET /api/v1/get-billing-estimate/:patient_id`: ICD billable estimates
//! and procedure prices in the patient's locality.

use axum::extract::{Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::{BillingEstimate, PatientRecord};

pub async fn get_patient(
    State(ctx): State<ApiContext>,
    Path(patient_id): Path<String>,
) -> Result<Json<PatientRecord>, ApiError> {
    let record = ctx.pipeline.fetch_record(&patient_id).await?;
    Ok(Json(record))
}

pub async fn get_billing_estimate(
    State(ctx): State<ApiContext>,
    Path(patient_id): Path<String>,
) -> Result<Json<BillingEstimate>, ApiError> {
    Ok(Json(ctx.pipeline.estimate_billing(&patient_id).await?))
}
