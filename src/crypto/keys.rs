use std::io::Write;
use std::path::Path;

use base64::Engine;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use super::CryptoError;
use super::encryption::EncryptedData;

pub const KEY_LENGTH: usize = 32; // AES-256

/// Field encryption key for patient free text, zeroed on drop.
///
/// On disk the key is a single line of URL-safe base64 (32 raw bytes).
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct NoteKey {
    key_bytes: [u8; KEY_LENGTH],
}

impl NoteKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key_bytes = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        Self { key_bytes }
    }

    pub fn from_bytes(key_bytes: [u8; KEY_LENGTH]) -> Self {
        Self { key_bytes }
    }

    /// Load a key file. A missing or malformed file is an error, never a
    /// reason to fall back to plaintext.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => Zeroizing::new(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CryptoError::KeyMissing(path.to_path_buf()));
            }
            Err(e) => {
                return Err(CryptoError::KeyUnreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        Self::decode(&raw).map_err(|reason| CryptoError::KeyUnreadable {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn decode(encoded: &str) -> Result<Self, String> {
        let trimmed = encoded.trim().trim_end_matches('=');
        let decoded = Zeroizing::new(
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(trimmed)
                .map_err(|e| format!("not valid base64: {e}"))?,
        );
        if decoded.len() != KEY_LENGTH {
            return Err(format!(
                "expected {KEY_LENGTH} key bytes, found {}",
                decoded.len()
            ));
        }
        let mut key_bytes = [0u8; KEY_LENGTH];
        key_bytes.copy_from_slice(&decoded);
        Ok(Self { key_bytes })
    }

    /// URL-safe base64 form written to key files.
    pub fn encoded(&self) -> Zeroizing<String> {
        Zeroizing::new(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.key_bytes))
    }

    /// Generate a key and write it to `path`. Refuses to replace an
    /// existing file unless `overwrite` is set.
    pub fn write_new(path: &Path, overwrite: bool) -> Result<Self, CryptoError> {
        let key = Self::generate();
        let mut options = std::fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(key.encoded().as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(key)
    }

    /// Encrypt data using AES-256-GCM
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedData, CryptoError> {
        EncryptedData::encrypt(&self.key_bytes, plaintext)
    }

    /// Decrypt data using AES-256-GCM
    pub fn decrypt(&self, encrypted: &EncryptedData) -> Result<Vec<u8>, CryptoError> {
        encrypted.decrypt(&self.key_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let k1 = NoteKey::generate();
        let k2 = NoteKey::generate();
        assert_ne!(k1.key_bytes, k2.key_bytes);
    }

    #[test]
    fn write_then_load_returns_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encryption.key");
        let written = NoteKey::write_new(&path, false).unwrap();
        let loaded = NoteKey::load(&path).unwrap();
        assert_eq!(written.key_bytes, loaded.key_bytes);
    }

    #[test]
    fn write_new_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encryption.key");
        NoteKey::write_new(&path, false).unwrap();
        assert!(NoteKey::write_new(&path, false).is_err());
        assert!(NoteKey::write_new(&path, true).is_ok());
    }

    #[test]
    fn missing_key_file_is_key_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = NoteKey::load(&dir.path().join("absent.key"));
        assert!(matches!(result, Err(CryptoError::KeyMissing(_))));
    }

    #[test]
    fn short_key_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.key");
        std::fs::write(&path, "c2hvcnQ").unwrap();
        assert!(matches!(
            NoteKey::load(&path),
            Err(CryptoError::KeyUnreadable { .. })
        ));
    }

    #[test]
    fn padded_key_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("padded.key");
        let key = NoteKey::from_bytes([7u8; KEY_LENGTH]);
        let padded = base64::engine::general_purpose::URL_SAFE.encode(key.key_bytes);
        std::fs::write(&path, format!("{padded}\n")).unwrap();
        let loaded = NoteKey::load(&path).unwrap();
        assert_eq!(loaded.key_bytes, [7u8; KEY_LENGTH]);
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encryption.key");
        NoteKey::write_new(&path, false).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
