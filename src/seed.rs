//! Bulk ingestion of visit notes saved as `.txt` files, and of the
//! tab-delimited Medicare reference files used for billing estimates.
//!
//! Each note file becomes one note for a freshly generated patient id. Files
//! are ingested in name order so repeated runs assign timestamps in a stable
//! order; re-seeding an unchanged file is a no-op.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::SealingGateway;
use crate::db::{
    ingest_note, insert_fee_schedule, insert_medicare_localities, InsertOutcome,
    PersistenceGateway, RepositoryError,
};
use crate::models::{FeeScheduleEntry, MedicareLocality};

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bad row in {path}: {source}")]
    Row {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeededNote {
    pub file: PathBuf,
    pub patient_id: String,
    pub patient_note_id: String,
    pub outcome: InsertOutcome,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SeedError + '_ {
    move |source| SeedError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `.txt` files directly under `dir`, sorted by name.
pub fn note_files(dir: &Path) -> Result<Vec<PathBuf>, SeedError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub async fn seed_directory(
    store: &dyn PersistenceGateway,
    sealer: &SealingGateway,
    dir: &Path,
    locality: Option<&str>,
) -> Result<Vec<SeededNote>, SeedError> {
    let mut seeded = Vec::new();
    for file in note_files(dir)? {
        let bytes = tokio::fs::read(&file).await.map_err(io_error(&file))?;
        let body = String::from_utf8_lossy(&bytes).replace('\0', "");
        let patient_id = Uuid::new_v4().to_string();
        let (patient_note_id, outcome) =
            ingest_note(store, sealer, &patient_id, &body, locality, "file").await?;
        seeded.push(SeededNote {
            file,
            patient_id,
            patient_note_id,
            outcome,
        });
    }
    tracing::info!(count = seeded.len(), dir = %dir.display(), "Seeded notes");
    Ok(seeded)
}

/// Locality configuration row. Header names follow the CMS download,
/// spelling included.
#[derive(Debug, Deserialize)]
struct LocalityRow {
    #[serde(rename = "Medicare Adminstrative Contractor")]
    mac: String,
    #[serde(rename = "Locality Number")]
    locality_number: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Fee Schedule Area")]
    fee_schedule_area: String,
    #[serde(rename = "Counties", default)]
    counties: String,
}

/// Physician fee schedule row, one per code, modifier and locality.
#[derive(Debug, Deserialize)]
struct FeeRow {
    hcpc: String,
    #[serde(default)]
    modifier: String,
    locality: String,
    #[serde(default)]
    sdesc: String,
    fac_price: Option<f64>,
    nfac_price: Option<f64>,
    fac_limiting_charge: Option<f64>,
    nfac_limiting_charge: Option<f64>,
    conv_fact: Option<f64>,
}

/// Parse a tab-delimited file with a header row. Header and field
/// whitespace is trimmed; rows may omit trailing columns.
async fn read_tab_delimited<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, SeedError> {
    let bytes = tokio::fs::read(path).await.map_err(io_error(path))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes.as_slice());
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| SeedError::Row {
            path: path.to_path_buf(),
            source,
        })
}

pub async fn seed_medicare_localities(
    store: &dyn PersistenceGateway,
    path: &Path,
) -> Result<usize, SeedError> {
    let localities: Vec<MedicareLocality> = read_tab_delimited::<LocalityRow>(path)
        .await?
        .into_iter()
        .map(|row| MedicareLocality {
            mac: row.mac,
            locality_number: row.locality_number,
            state: row.state,
            fee_schedule_area: row.fee_schedule_area,
            counties: row.counties,
        })
        .collect();
    let inserted = insert_medicare_localities(store, &localities).await?;
    tracing::info!(rows = localities.len(), inserted, file = %path.display(), "Seeded Medicare localities");
    Ok(inserted)
}

pub async fn seed_fee_schedule(store: &dyn PersistenceGateway, path: &Path) -> Result<usize, SeedError> {
    let entries: Vec<FeeScheduleEntry> = read_tab_delimited::<FeeRow>(path)
        .await?
        .into_iter()
        .filter(|row| !row.hcpc.is_empty())
        .map(|row| FeeScheduleEntry {
            hcpc: row.hcpc.to_ascii_uppercase(),
            modifier: row.modifier,
            locality: row.locality,
            short_description: row.sdesc,
            facility_price: row.fac_price,
            non_facility_price: row.nfac_price,
            facility_limiting_charge: row.fac_limiting_charge,
            non_facility_limiting_charge: row.nfac_limiting_charge,
            conv_fact: row.conv_fact,
        })
        .collect();
    let inserted = insert_fee_schedule(store, &entries).await?;
    tracing::info!(rows = entries.len(), inserted, file = %path.display(), "Seeded fee schedule");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::content_digest;
    use crate::db::{fee_schedule_areas, load_note, locality_fees, open_memory_database, SqliteGateway};

    #[tokio::test]
    async fn seeds_only_txt_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "P: second").unwrap();
        std::fs::write(dir.path().join("a.txt"), "P: first\0").unwrap();
        std::fs::write(dir.path().join("skip.md"), "ignored").unwrap();

        let store = SqliteGateway::new(open_memory_database().unwrap());
        let sealer = SealingGateway::plaintext();
        let seeded = seed_directory(&store, &sealer, dir.path(), Some("ca"))
            .await
            .unwrap();

        assert_eq!(seeded.len(), 2);
        assert!(seeded[0].file.ends_with("a.txt"));
        assert_eq!(seeded[0].patient_note_id, content_digest("P: first"));
        assert_ne!(seeded[0].patient_id, seeded[1].patient_id);

        let note = load_note(&store, &seeded[1].patient_note_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.locality.as_deref(), Some("ca"));
    }

    #[tokio::test]
    async fn reseeding_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "P: same").unwrap();
        let store = SqliteGateway::new(open_memory_database().unwrap());
        let sealer = SealingGateway::plaintext();

        seed_directory(&store, &sealer, dir.path(), None).await.unwrap();
        let again = seed_directory(&store, &sealer, dir.path(), None).await.unwrap();
        assert_eq!(again[0].outcome, InsertOutcome::AlreadyPresent);
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(matches!(
            note_files(Path::new("/definitely/not/here")),
            Err(SeedError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn seeds_tab_delimited_localities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medicare_locality_configuration.txt");
        std::fs::write(
            &path,
            " Medicare Adminstrative Contractor\tLocality Number\tState\tFee Schedule Area \tCounties\n\
             10112\t00\tALABAMA\tSTATEWIDE\tALL COUNTIES\n\
             02102\t01\tALASKA\tSTATEWIDE\n",
        )
        .unwrap();
        let store = SqliteGateway::new(open_memory_database().unwrap());

        assert_eq!(seed_medicare_localities(&store, &path).await.unwrap(), 2);
        assert_eq!(seed_medicare_localities(&store, &path).await.unwrap(), 0);
        assert_eq!(fee_schedule_areas(&store, "01").await.unwrap(), vec!["STATEWIDE"]);
    }

    #[tokio::test]
    async fn seeds_fee_schedule_with_blank_prices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fees.txt");
        std::fs::write(
            &path,
            "hcpc\tmodifier\tlocality\tsdesc\tfac_price\tnfac_price\tfac_limiting_charge\tnfac_limiting_charge\tconv_fact\n\
             99213\t\t01\tOffice o/p est low 20 min\t63.21\t92.1\t69.05\t100.62\t32.7442\n\
             g0108\t\t01\tDiab manage trn per indiv\t\t\t\t\t32.7442\n\
             \t\t01\tblank code\t1\t1\t1\t1\t1\n",
        )
        .unwrap();
        let store = SqliteGateway::new(open_memory_database().unwrap());

        assert_eq!(seed_fee_schedule(&store, &path).await.unwrap(), 2);
        let fees = locality_fees(&store, "99213", "01").await.unwrap();
        assert_eq!(fees[0].non_facility_price, Some(92.1));
        let unpriced = locality_fees(&store, "G0108", "01").await.unwrap();
        assert_eq!(unpriced[0].facility_price, None);
    }

    #[tokio::test]
    async fn malformed_price_is_a_row_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fees.txt");
        std::fs::write(&path, "hcpc\tlocality\tnfac_price\n99213\t01\tabout ninety\n").unwrap();
        let store = SqliteGateway::new(open_memory_database().unwrap());
        assert!(matches!(
            seed_fee_schedule(&store, &path).await,
            Err(SeedError::Row { .. })
        ));
    }
}
