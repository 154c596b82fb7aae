pub mod sqlite;
pub mod gateway;
pub mod repository;
pub mod billing; // fee schedule and billing forecasts

pub use sqlite::*;
pub use gateway::*;
pub use repository::*;
pub use billing::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },
}
