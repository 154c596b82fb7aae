//! Persistence gateway: idempotent inserts and dictionary-shaped queries.
//!
//! Rows cross this boundary as JSON field maps so the pipeline never
//! touches SQL types. Table and column names are checked against a fixed
//! allow-list before any statement is built; values are always bound.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::Value;
use thiserror::Error;

use super::DatabaseError;

pub type FieldMap = serde_json::Map<String, Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Column {column} is not part of table {table}")]
    InvalidColumn { table: String, column: String },

    #[error("Refusing to insert an empty record into {0}")]
    EmptyRecord(String),

    #[error("Query is not read-only")]
    NotReadOnly,

    #[error("Storage worker failed: {0}")]
    Worker(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same key already existed; nothing was written.
    AlreadyPresent,
}

/// One pending insert for [`PersistenceGateway::insert_all_if_absent`].
#[derive(Debug, Clone)]
pub struct PendingInsert {
    pub table: &'static str,
    pub fields: FieldMap,
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Insert `fields` unless a row with the same key exists. A conflict is
    /// not an error and never overwrites.
    async fn insert_if_absent(&self, table: &str, fields: FieldMap)
        -> Result<InsertOutcome, StoreError>;

    /// Run a read-only statement and return each row as a field map.
    async fn query_dicts(&self, sql: &str, params: Vec<Value>) -> Result<Vec<FieldMap>, StoreError>;

    /// Insert several rows in order. Implementations backed by a
    /// transactional store apply all of them or none.
    async fn insert_all_if_absent(
        &self,
        rows: Vec<PendingInsert>,
    ) -> Result<Vec<InsertOutcome>, StoreError> {
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            outcomes.push(self.insert_if_absent(row.table, row.fields).await?);
        }
        Ok(outcomes)
    }
}

const TABLES: &[(&str, &[&str])] = &[
    (
        "patient_notes",
        &["patient_note_id", "patient_id", "timestamp", "patient_note"],
    ),
    (
        "analysis_records",
        &[
            "patient_document_id",
            "patient_id",
            "patient_note_id",
            "patient_locality",
            "llm",
            "timestamp",
            "analysis_document",
        ],
    ),
    (
        "codes_documents",
        &["patient_id", "patient_document_id", "timestamp", "codes_document"],
    ),
    (
        "code_reference",
        &[
            "system",
            "code",
            "billable",
            "short_description",
            "long_description",
            "billing_guidelines",
        ],
    ),
    (
        "fee_schedule",
        &[
            "hcpc",
            "modifier",
            "locality",
            "short_description",
            "fac_price",
            "nfac_price",
            "fac_limiting_charge",
            "nfac_limiting_charge",
            "conv_fact",
        ],
    ),
    (
        "medicare_localities",
        &["mac", "locality_number", "state", "fee_schedule_area", "counties"],
    ),
];

fn validate(table: &str, fields: &FieldMap) -> Result<(), StoreError> {
    let columns = TABLES
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, cols)| *cols)
        .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
    if fields.is_empty() {
        return Err(StoreError::EmptyRecord(table.to_string()));
    }
    for column in fields.keys() {
        if !columns.contains(&column.as_str()) {
            return Err(StoreError::InvalidColumn {
                table: table.to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

fn insert_row(conn: &Connection, table: &str, fields: &FieldMap) -> Result<InsertOutcome, StoreError> {
    validate(table, fields)?;
    let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
        columns.join(", "),
        placeholders.join(", ")
    );
    let values: Vec<SqlValue> = fields.values().map(to_sql).collect();
    let changed = conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
    Ok(if changed == 0 {
        InsertOutcome::AlreadyPresent
    } else {
        InsertOutcome::Inserted
    })
}

fn query_rows(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<FieldMap>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(StoreError::NotReadOnly);
    }
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let values: Vec<SqlValue> = params.iter().map(to_sql).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(values.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = FieldMap::new();
        for (idx, name) in names.iter().enumerate() {
            map.insert(name.clone(), from_sql(row.get_ref(idx)?));
        }
        out.push(map);
    }
    Ok(out)
}

/// SQLite-backed gateway. Statements run on the blocking pool so callers
/// on the async runtime never stall.
#[derive(Clone)]
pub struct SqliteGateway {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGateway {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Worker("connection lock poisoned".into()))?;
            work(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn insert_if_absent(
        &self,
        table: &str,
        fields: FieldMap,
    ) -> Result<InsertOutcome, StoreError> {
        let table = table.to_string();
        self.with_conn(move |conn| insert_row(conn, &table, &fields)).await
    }

    async fn query_dicts(&self, sql: &str, params: Vec<Value>) -> Result<Vec<FieldMap>, StoreError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| query_rows(conn, &sql, &params)).await
    }

    async fn insert_all_if_absent(
        &self,
        rows: Vec<PendingInsert>,
    ) -> Result<Vec<InsertOutcome>, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut outcomes = Vec::with_capacity(rows.len());
            for row in &rows {
                outcomes.push(insert_row(&tx, row.table, &row.fields)?);
            }
            tx.commit()?;
            Ok(outcomes)
        })
        .await
    }
}
