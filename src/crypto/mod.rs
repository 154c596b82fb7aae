pub mod keys;
pub mod encryption;
pub mod seal;

#[cfg(test)]
mod phi_audit;

pub use keys::*;
pub use encryption::*;
pub use seal::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    #[error("Encryption key file not found: {0} (create one with `clincode keygen`)")]
    KeyMissing(PathBuf),

    #[error("Encryption key file {path} unreadable: {reason}")]
    KeyUnreadable { path: PathBuf, reason: String },

    #[error("Stored value is not valid ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("Decrypted text is not valid UTF-8")]
    InvalidUtf8,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
