//! Typed shapes for everything the pipeline reads or persists.
//!
//! Persisted JSON documents carry a `schema_version` discriminator and are
//! decoded through [`decode_versioned`], which refuses versions it does not
//! know instead of guessing at their shape.

pub mod enums;
pub mod note;
pub mod analysis;
pub mod codes;
pub mod billing;

pub use enums::*;
pub use note::*;
pub use analysis::*;
pub use codes::*;
pub use billing::*;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Malformed {kind} document: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} document has no schema_version")]
    MissingVersion { kind: &'static str },

    #[error("Unsupported {kind} schema_version {version:?}")]
    UnsupportedVersion { kind: &'static str, version: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: &'static str, value: String },
}

/// A persisted document family with a closed set of schema versions.
pub trait Versioned: DeserializeOwned {
    const KIND: &'static str;
    const SUPPORTED: &'static [&'static str];
}

/// Decode a stored document, branching on its `schema_version` first.
pub fn decode_versioned<T: Versioned>(raw: &str) -> Result<T, DocumentError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|source| DocumentError::Malformed {
            kind: T::KIND,
            source,
        })?;
    // Versions are always written as strings; anything else is a document
    // this build did not produce.
    let version = match value.get("schema_version") {
        Some(serde_json::Value::String(v)) => v.clone(),
        None | Some(serde_json::Value::Null) => {
            return Err(DocumentError::MissingVersion { kind: T::KIND })
        }
        Some(other) => {
            return Err(DocumentError::UnsupportedVersion {
                kind: T::KIND,
                version: format!("{other} (not a string)"),
            })
        }
    };
    if !T::SUPPORTED.contains(&version.as_str()) {
        return Err(DocumentError::UnsupportedVersion {
            kind: T::KIND,
            version,
        });
    }
    serde_json::from_value(value).map_err(|source| DocumentError::Malformed {
        kind: T::KIND,
        source,
    })
}
