//! Locality fee schedule and billing forecasts over stored codes.
//!
//! A patient's locality is matched verbatim against `fee_schedule.locality`.
//! Procedure codes come from every coded procedure category of a codes
//! document; ICD codes are reported with their billable flag and payer
//! reimbursement rates.

use serde_json::{json, Value};

use super::gateway::{FieldMap, InsertOutcome, PendingInsert, PersistenceGateway};
use super::repository::{optional_text, text, RepositoryError};
use crate::models::{
    decode_versioned, AnalysisCosts, BillingEstimate, CodeCategory, CodeDetail, CodesDocument,
    FeeScheduleEntry, IcdBillableEstimate, MedicareLocality, PatientLocalityCodes, ProcedureCost,
    StoredCodesDocument, INSURANCE_COMPANY, MEDICAL_PROVIDER,
};

/// Categories whose codes are priced by the fee schedule.
const PRICED_CATEGORIES: [CodeCategory; 4] = [
    CodeCategory::Cpt,
    CodeCategory::Hcpcs,
    CodeCategory::PrescriptionCpt,
    CodeCategory::PrescriptionHcpcs,
];

fn real(row: &FieldMap, column: &str) -> Option<f64> {
    row.get(column).and_then(Value::as_f64)
}

fn decode_codes(raw: &str) -> Result<CodesDocument, RepositoryError> {
    Ok(decode_versioned::<StoredCodesDocument>(raw)?.into_current())
}

fn count_inserted(outcomes: &[InsertOutcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| **o == InsertOutcome::Inserted)
        .count()
}

/// Load fee schedule rows in one transaction. Rows whose (code, modifier,
/// locality) already exist are kept as they are. Returns how many were new.
pub async fn insert_fee_schedule(
    store: &dyn PersistenceGateway,
    entries: &[FeeScheduleEntry],
) -> Result<usize, RepositoryError> {
    let rows = entries
        .iter()
        .map(|entry| {
            let mut fields = FieldMap::new();
            fields.insert("hcpc".into(), json!(entry.hcpc));
            fields.insert("modifier".into(), json!(entry.modifier));
            fields.insert("locality".into(), json!(entry.locality));
            fields.insert("short_description".into(), json!(entry.short_description));
            fields.insert("fac_price".into(), json!(entry.facility_price));
            fields.insert("nfac_price".into(), json!(entry.non_facility_price));
            fields.insert("fac_limiting_charge".into(), json!(entry.facility_limiting_charge));
            fields.insert(
                "nfac_limiting_charge".into(),
                json!(entry.non_facility_limiting_charge),
            );
            fields.insert("conv_fact".into(), json!(entry.conv_fact));
            PendingInsert {
                table: "fee_schedule",
                fields,
            }
        })
        .collect();
    Ok(count_inserted(&store.insert_all_if_absent(rows).await?))
}

pub async fn insert_medicare_localities(
    store: &dyn PersistenceGateway,
    localities: &[MedicareLocality],
) -> Result<usize, RepositoryError> {
    let rows = localities
        .iter()
        .map(|locality| {
            let mut fields = FieldMap::new();
            fields.insert("mac".into(), json!(locality.mac));
            fields.insert("locality_number".into(), json!(locality.locality_number));
            fields.insert("state".into(), json!(locality.state));
            fields.insert("fee_schedule_area".into(), json!(locality.fee_schedule_area));
            fields.insert("counties".into(), json!(locality.counties));
            PendingInsert {
                table: "medicare_localities",
                fields,
            }
        })
        .collect();
    Ok(count_inserted(&store.insert_all_if_absent(rows).await?))
}

/// Prices of one CPT or HCPCS code in one locality, rounded to cents,
/// one entry per modifier.
pub async fn locality_fees(
    store: &dyn PersistenceGateway,
    code: &str,
    locality: &str,
) -> Result<Vec<FeeScheduleEntry>, RepositoryError> {
    let rows = store
        .query_dicts(
            "SELECT hcpc, modifier, locality, short_description,
                    ROUND(fac_price, 2) AS fac_price,
                    ROUND(nfac_price, 2) AS nfac_price,
                    ROUND(fac_limiting_charge, 2) AS fac_limiting_charge,
                    ROUND(nfac_limiting_charge, 2) AS nfac_limiting_charge,
                    conv_fact
             FROM fee_schedule WHERE hcpc = ?1 AND locality = ?2
             ORDER BY modifier",
            vec![json!(code), json!(locality)],
        )
        .await?;
    let mut fees = Vec::with_capacity(rows.len());
    for row in &rows {
        fees.push(FeeScheduleEntry {
            hcpc: text(row, "hcpc")?,
            modifier: optional_text(row, "modifier").unwrap_or_default(),
            locality: text(row, "locality")?,
            short_description: optional_text(row, "short_description").unwrap_or_default(),
            facility_price: real(row, "fac_price"),
            non_facility_price: real(row, "nfac_price"),
            facility_limiting_charge: real(row, "fac_limiting_charge"),
            non_facility_limiting_charge: real(row, "nfac_limiting_charge"),
            conv_fact: real(row, "conv_fact"),
        });
    }
    Ok(fees)
}

/// Fee schedule areas registered under a locality number.
pub async fn fee_schedule_areas(
    store: &dyn PersistenceGateway,
    locality_number: &str,
) -> Result<Vec<String>, RepositoryError> {
    let rows = store
        .query_dicts(
            "SELECT DISTINCT fee_schedule_area FROM medicare_localities
             WHERE locality_number = ?1 ORDER BY fee_schedule_area",
            vec![json!(locality_number)],
        )
        .await?;
    rows.iter().map(|row| text(row, "fee_schedule_area")).collect()
}

/// Locality and distinct procedure codes of one stored analysis.
pub async fn patient_locality_and_codes(
    store: &dyn PersistenceGateway,
    patient_document_id: &str,
) -> Result<Option<PatientLocalityCodes>, RepositoryError> {
    let rows = store
        .query_dicts(
            "SELECT ar.patient_id, ar.patient_locality, cd.codes_document
             FROM analysis_records ar
             JOIN codes_documents cd
               ON cd.patient_id = ar.patient_id
              AND cd.patient_document_id = ar.patient_document_id
             WHERE ar.patient_document_id = ?1",
            vec![json!(patient_document_id)],
        )
        .await?;
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    let document = decode_codes(&text(row, "codes_document")?)?;
    let mut codes: Vec<String> = Vec::new();
    for category in PRICED_CATEGORIES {
        for code in &document.get(category).codes {
            if !codes.contains(code) {
                codes.push(code.clone());
            }
        }
    }
    Ok(Some(PatientLocalityCodes {
        patient_id: text(row, "patient_id")?,
        patient_document_id: patient_document_id.to_string(),
        locality: optional_text(row, "patient_locality"),
        codes,
    }))
}

/// Price every procedure code of one analysis in the patient's locality.
/// Without a locality no code can be priced and every fee list is empty.
pub async fn analysis_costs(
    store: &dyn PersistenceGateway,
    patient_document_id: &str,
) -> Result<Option<AnalysisCosts>, RepositoryError> {
    let Some(located) = patient_locality_and_codes(store, patient_document_id).await? else {
        return Ok(None);
    };
    let mut procedures = Vec::with_capacity(located.codes.len());
    for code in located.codes {
        let fees = match located.locality.as_deref() {
            Some(locality) => locality_fees(store, &code, locality).await?,
            None => Vec::new(),
        };
        procedures.push(ProcedureCost { code, fees });
    }
    let fee_schedule_areas = match located.locality.as_deref() {
        Some(locality) => fee_schedule_areas(store, locality).await?,
        None => Vec::new(),
    };
    Ok(Some(AnalysisCosts {
        patient_document_id: located.patient_document_id,
        locality: located.locality,
        fee_schedule_areas,
        procedures,
    }))
}

/// ICD codes of every stored analysis of a patient, oldest analysis first.
pub async fn icd_billable_estimates(
    store: &dyn PersistenceGateway,
    patient_id: &str,
) -> Result<Vec<IcdBillableEstimate>, RepositoryError> {
    let rows = store
        .query_dicts(
            "SELECT ar.patient_document_id, ar.patient_locality, cd.codes_document
             FROM codes_documents cd
             JOIN analysis_records ar
               ON ar.patient_id = cd.patient_id
              AND ar.patient_document_id = cd.patient_document_id
             WHERE cd.patient_id = ?1
             ORDER BY ar.timestamp, ar.patient_document_id",
            vec![json!(patient_id)],
        )
        .await?;

    let mut estimates = Vec::new();
    for row in &rows {
        let patient_document_id = text(row, "patient_document_id")?;
        let patient_locality = optional_text(row, "patient_locality");
        let document = decode_codes(&text(row, "codes_document")?)?;
        for detail in &document.icd.details {
            let estimate = match detail {
                CodeDetail::Found(found) => {
                    let rate = |role: &str| {
                        found
                            .billing_guidelines
                            .get(role)
                            .and_then(|r| r.reimbursement_rate)
                    };
                    IcdBillableEstimate {
                        patient_document_id: patient_document_id.clone(),
                        code: found.code.clone(),
                        billable: found.billable,
                        short_description: Some(found.short_description.clone()),
                        medical_provider_reimbursement_rate: rate(MEDICAL_PROVIDER),
                        insurance_company_reimbursement_rate: rate(INSURANCE_COMPANY),
                        patient_locality: patient_locality.clone(),
                    }
                }
                CodeDetail::NotFound { code, .. } => IcdBillableEstimate {
                    patient_document_id: patient_document_id.clone(),
                    code: code.clone(),
                    billable: None,
                    short_description: None,
                    medical_provider_reimbursement_rate: None,
                    insurance_company_reimbursement_rate: None,
                    patient_locality: patient_locality.clone(),
                },
            };
            estimates.push(estimate);
        }
    }
    Ok(estimates)
}

/// ICD estimates plus priced procedures for every analysis of a patient.
/// `None` when the patient has no stored notes.
pub async fn billing_estimate(
    store: &dyn PersistenceGateway,
    patient_id: &str,
) -> Result<Option<BillingEstimate>, RepositoryError> {
    let known = store
        .query_dicts(
            "SELECT 1 AS known FROM patient_notes WHERE patient_id = ?1 LIMIT 1",
            vec![json!(patient_id)],
        )
        .await?;
    if known.is_empty() {
        return Ok(None);
    }

    let document_rows = store
        .query_dicts(
            "SELECT patient_document_id FROM analysis_records
             WHERE patient_id = ?1 ORDER BY timestamp, patient_document_id",
            vec![json!(patient_id)],
        )
        .await?;
    let mut analyses = Vec::with_capacity(document_rows.len());
    for row in &document_rows {
        if let Some(costs) = analysis_costs(store, &text(row, "patient_document_id")?).await? {
            analyses.push(costs);
        }
    }

    Ok(Some(BillingEstimate {
        patient_id: patient_id.to_string(),
        icd: icd_billable_estimates(store, patient_id).await?,
        analyses,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::crypto::SealingGateway;
    use crate::db::gateway::SqliteGateway;
    use crate::db::repository::{ingest_note, storage_timestamp};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{CategoryCodes, FoundDetail, PayerRate};

    fn store() -> SqliteGateway {
        SqliteGateway::new(open_memory_database().unwrap())
    }

    fn fee(hcpc: &str, modifier: &str, locality: &str, nfac: f64) -> FeeScheduleEntry {
        FeeScheduleEntry {
            hcpc: hcpc.into(),
            modifier: modifier.into(),
            locality: locality.into(),
            short_description: format!("desc {hcpc}"),
            facility_price: Some(nfac - 20.0),
            non_facility_price: Some(nfac),
            facility_limiting_charge: None,
            non_facility_limiting_charge: Some(nfac * 1.0925),
            conv_fact: Some(32.7442),
        }
    }

    fn codes_document(icd: Vec<CodeDetail>, cpt: &[&str], hcpcs: &[&str]) -> CodesDocument {
        let now = Utc::now();
        let with_codes = |codes: &[&str]| CategoryCodes {
            codes: codes.iter().map(|c| c.to_string()).collect(),
            ..CategoryCodes::empty(now)
        };
        CodesDocument {
            icd: CategoryCodes {
                codes: icd.iter().map(|d| d.code().to_string()).collect(),
                details: icd,
                ..CategoryCodes::empty(now)
            },
            cpt: with_codes(cpt),
            hcpcs: with_codes(hcpcs),
            prescription: CategoryCodes::empty(now),
            prescription_cpt: with_codes(&["99213"]),
            prescription_hcpcs: CategoryCodes::empty(now),
        }
    }

    /// Store a note plus one analysis record and its codes document.
    async fn store_analysis(
        store: &SqliteGateway,
        patient_id: &str,
        document_id: &str,
        locality: Option<&str>,
        codes: CodesDocument,
    ) {
        let (note_id, _) = ingest_note(
            store,
            &SealingGateway::plaintext(),
            patient_id,
            &format!("note for {document_id}"),
            locality,
            "test",
        )
        .await
        .unwrap();
        let now = storage_timestamp(Utc::now());
        let mut record = FieldMap::new();
        record.insert("patient_document_id".into(), json!(document_id));
        record.insert("patient_id".into(), json!(patient_id));
        record.insert("patient_note_id".into(), json!(note_id));
        record.insert("patient_locality".into(), json!(locality));
        record.insert("llm".into(), json!("medllama2"));
        record.insert("timestamp".into(), json!(now));
        record.insert("analysis_document".into(), json!("{}"));
        let mut doc = FieldMap::new();
        doc.insert("patient_id".into(), json!(patient_id));
        doc.insert("patient_document_id".into(), json!(document_id));
        doc.insert("timestamp".into(), json!(now));
        doc.insert(
            "codes_document".into(),
            json!(serde_json::to_string(&StoredCodesDocument::V1(codes)).unwrap()),
        );
        store
            .insert_all_if_absent(vec![
                PendingInsert {
                    table: "analysis_records",
                    fields: record,
                },
                PendingInsert {
                    table: "codes_documents",
                    fields: doc,
                },
            ])
            .await
            .unwrap();
    }

    fn found_icd(code: &str, provider: f64) -> CodeDetail {
        let mut guidelines = BTreeMap::new();
        guidelines.insert(
            MEDICAL_PROVIDER.to_string(),
            PayerRate {
                reimbursement_rate: Some(provider),
            },
        );
        CodeDetail::Found(FoundDetail {
            code: code.into(),
            billable: Some(true),
            short_description: "Type 2 diabetes mellitus without complications".into(),
            long_description: String::new(),
            billing_guidelines: guidelines,
        })
    }

    #[tokio::test]
    async fn locality_fees_are_rounded_and_scoped_to_locality() {
        let store = store();
        let inserted = insert_fee_schedule(
            &store,
            &[
                fee("99213", "", "01", 92.456),
                fee("99213", "26", "01", 40.0),
                fee("99213", "", "99", 120.0),
            ],
        )
        .await
        .unwrap();
        assert_eq!(inserted, 3);

        let fees = locality_fees(&store, "99213", "01").await.unwrap();
        assert_eq!(fees.len(), 2);
        assert_eq!(fees[0].modifier, "");
        assert_eq!(fees[0].non_facility_price, Some(92.46));
        assert_eq!(fees[0].conv_fact, Some(32.7442));
        assert_eq!(fees[1].modifier, "26");
        assert!(locality_fees(&store, "99213", "02").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reloading_fee_schedule_keeps_existing_rows() {
        let store = store();
        insert_fee_schedule(&store, &[fee("83036", "", "01", 13.0)]).await.unwrap();
        let again = insert_fee_schedule(
            &store,
            &[fee("83036", "", "01", 99.0), fee("83037", "", "01", 14.0)],
        )
        .await
        .unwrap();
        assert_eq!(again, 1);
        let fees = locality_fees(&store, "83036", "01").await.unwrap();
        assert_eq!(fees[0].non_facility_price, Some(13.0));
    }

    #[tokio::test]
    async fn locality_codes_collect_every_priced_category_once() {
        let store = store();
        store_analysis(
            &store,
            "p-1",
            "doc-1",
            Some("01"),
            codes_document(vec![], &["99213", "83036"], &["G0108"]),
        )
        .await;

        let located = patient_locality_and_codes(&store, "doc-1").await.unwrap().unwrap();
        assert_eq!(located.patient_id, "p-1");
        assert_eq!(located.locality.as_deref(), Some("01"));
        assert_eq!(located.codes, vec!["99213", "83036", "G0108"]);
        assert!(patient_locality_and_codes(&store, "doc-x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn icd_estimates_carry_rates_and_placeholders() {
        let store = store();
        store_analysis(
            &store,
            "p-1",
            "doc-1",
            Some("01"),
            codes_document(
                vec![found_icd("E11.9", 85.0), CodeDetail::not_found("Z79.4")],
                &[],
                &[],
            ),
        )
        .await;

        let estimates = icd_billable_estimates(&store, "p-1").await.unwrap();
        assert_eq!(estimates.len(), 2);
        assert_eq!(estimates[0].code, "E11.9");
        assert_eq!(estimates[0].billable, Some(true));
        assert_eq!(estimates[0].medical_provider_reimbursement_rate, Some(85.0));
        assert_eq!(estimates[0].insurance_company_reimbursement_rate, None);
        assert_eq!(estimates[0].patient_locality.as_deref(), Some("01"));
        assert_eq!(estimates[1].code, "Z79.4");
        assert_eq!(estimates[1].billable, None);
        assert!(icd_billable_estimates(&store, "p-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn billing_estimate_prices_procedures_in_patient_locality() {
        let store = store();
        insert_fee_schedule(
            &store,
            &[fee("99213", "", "01", 92.0), fee("83036", "", "01", 13.0)],
        )
        .await
        .unwrap();
        insert_medicare_localities(
            &store,
            &[MedicareLocality {
                mac: "10112".into(),
                locality_number: "01".into(),
                state: "ALABAMA".into(),
                fee_schedule_area: "STATEWIDE".into(),
                counties: "ALL COUNTIES".into(),
            }],
        )
        .await
        .unwrap();
        store_analysis(
            &store,
            "p-1",
            "doc-1",
            Some("01"),
            codes_document(vec![found_icd("E11.9", 85.0)], &["99213", "83036"], &["G0108"]),
        )
        .await;

        let estimate = billing_estimate(&store, "p-1").await.unwrap().unwrap();
        assert_eq!(estimate.icd.len(), 1);
        let costs = &estimate.analyses[0];
        assert_eq!(costs.fee_schedule_areas, vec!["STATEWIDE"]);
        assert_eq!(costs.procedures.len(), 3);
        assert_eq!(costs.procedures[2].code, "G0108");
        assert!(costs.procedures[2].fees.is_empty());
        assert!((costs.non_facility_total() - 105.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unlocated_analysis_has_no_prices() {
        let store = store();
        insert_fee_schedule(&store, &[fee("99213", "", "01", 92.0)]).await.unwrap();
        store_analysis(&store, "p-1", "doc-1", None, codes_document(vec![], &["99213"], &[])).await;

        let costs = analysis_costs(&store, "doc-1").await.unwrap().unwrap();
        assert!(costs.locality.is_none());
        assert!(costs.procedures.iter().all(|p| p.fees.is_empty()));
    }

    #[tokio::test]
    async fn unknown_patient_has_no_estimate() {
        assert!(billing_estimate(&store(), "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn patient_without_analyses_gets_empty_estimate() {
        let store = store();
        ingest_note(&store, &SealingGateway::plaintext(), "p-3", "body", Some("01"), "test")
            .await
            .unwrap();
        let estimate = billing_estimate(&store, "p-3").await.unwrap().unwrap();
        assert!(estimate.icd.is_empty());
        assert!(estimate.analyses.is_empty());
    }
}
