//! Content addressing and the plaintext/ciphertext boundary for patient
//! free text.
//!
//! Only narrative fields (note body, summary, diagnosis, prescription) pass
//! through `SealingGateway`. Codes, detail objects, timestamps and model
//! identifiers are stored as-is so they stay queryable.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use super::CryptoError;
use super::encryption::EncryptedData;
use super::keys::NoteKey;
use crate::config::EncryptionConfig;

/// Warning attached to every outcome that wrote unencrypted patient text.
pub const PLAINTEXT_WARNING: &str =
    "URGENT: patient data encryption is disabled; clinical text was stored in plaintext";

/// SHA-512 hex digest of `text`. Identity of every content-addressed row.
pub fn content_digest(text: &str) -> String {
    hex::encode(Sha512::digest(text.as_bytes()))
}

/// A narrative field ready for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sealed {
    /// Digest of the plaintext, independent of encryption state.
    pub digest: String,
    /// Ciphertext text form when encrypting, otherwise the plaintext.
    pub stored_value: String,
    pub encrypted: bool,
}

/// Seals and opens narrative fields according to the deployment policy.
pub struct SealingGateway {
    key: Option<NoteKey>,
    plaintext_announced: AtomicBool,
}

impl SealingGateway {
    pub fn encrypting(key: NoteKey) -> Self {
        Self {
            key: Some(key),
            plaintext_announced: AtomicBool::new(false),
        }
    }

    pub fn plaintext() -> Self {
        Self {
            key: None,
            plaintext_announced: AtomicBool::new(false),
        }
    }

    /// Build from configuration. With encryption enabled the key file must
    /// load; there is no silent fallback to plaintext.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self, CryptoError> {
        if config.enabled {
            let key = NoteKey::load(&config.key_path)?;
            Ok(Self::encrypting(key))
        } else {
            tracing::warn!("Patient data encryption disabled by configuration");
            Ok(Self::plaintext())
        }
    }

    pub fn is_encrypting(&self) -> bool {
        self.key.is_some()
    }

    pub fn seal(&self, plaintext: &str) -> Result<Sealed, CryptoError> {
        let digest = content_digest(plaintext);
        match &self.key {
            Some(key) => {
                let encrypted = key.encrypt(plaintext.as_bytes())?;
                Ok(Sealed {
                    digest,
                    stored_value: encrypted.to_text(),
                    encrypted: true,
                })
            }
            None => Ok(Sealed {
                digest,
                stored_value: plaintext.to_string(),
                encrypted: false,
            }),
        }
    }

    /// Recover plaintext from a stored value. The result must only be fed
    /// to extraction or a prompt, never written back.
    pub fn open(&self, stored_value: &str) -> Result<Zeroizing<String>, CryptoError> {
        match &self.key {
            Some(key) => {
                let encrypted = EncryptedData::from_text(stored_value)?;
                let bytes = Zeroizing::new(key.decrypt(&encrypted)?);
                let text = std::str::from_utf8(&bytes).map_err(|_| CryptoError::InvalidUtf8)?;
                Ok(Zeroizing::new(text.to_string()))
            }
            None => Ok(Zeroizing::new(stored_value.to_string())),
        }
    }

    /// Called immediately before persisting sealed fields. Returns the
    /// plaintext warning when any field is unencrypted; the first such
    /// write in the process also prints a banner on stderr.
    pub fn check_write(&self, fields: &[&Sealed]) -> Option<&'static str> {
        if fields.iter().all(|f| f.encrypted) {
            return None;
        }
        if !self.plaintext_announced.swap(true, Ordering::SeqCst) {
            eprintln!();
            eprintln!("**************************************************************");
            eprintln!("* {PLAINTEXT_WARNING}");
            eprintln!("* If this is a production deployment, notify immediately.");
            eprintln!("**************************************************************");
            eprintln!();
        }
        tracing::error!(
            "URGENT: Patient Data Encryption disabled! If spotted in production logs, notify immediately!"
        );
        Some(PLAINTEXT_WARNING)
    }
}
