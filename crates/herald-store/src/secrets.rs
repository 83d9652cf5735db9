//! At-rest sealing of credential material.
//!
//! Sealed values are `v1.` followed by base64 of `nonce ‖ ciphertext`
//! (ChaCha20-Poly1305, fresh 96-bit nonce per seal).

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use tracing::info;

const ENVELOPE: &str = "v1.";
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("sealing failed")]
    Seal,
    #[error("sealed value rejected (wrong key or tampered)")]
    Open,
    #[error("malformed sealed value")]
    Malformed,
    #[error("{} does not hold a 32-byte key", .0.display())]
    BadKey(PathBuf),
    #[error("key file: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds the credential key for the life of the store.
pub struct Sealer {
    cipher: ChaCha20Poly1305,
}

impl Sealer {
    /// Fresh random key, never written anywhere.
    pub fn generate() -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(&ChaCha20Poly1305::generate_key(&mut OsRng)),
        }
    }

    /// Read the base64 key at `path`, creating it (owner-only) if absent.
    pub fn from_key_file(path: &Path) -> Result<Self, SecretError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_encoded(text.trim())
                .ok_or_else(|| SecretError::BadKey(path.to_path_buf())),
            Err(e) if e.kind() == ErrorKind::NotFound => Self::create_key_file(path),
            Err(e) => Err(e.into()),
        }
    }

    fn from_encoded(text: &str) -> Option<Self> {
        let bytes = STANDARD.decode(text).ok()?;
        let cipher = ChaCha20Poly1305::new_from_slice(&bytes).ok()?;
        Some(Self { cipher })
    }

    fn create_key_file(path: &Path) -> Result<Self, SecretError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = match options.open(path) {
            Ok(file) => file,
            // Lost a race with another process creating the same key.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Self::from_key_file(path),
            Err(e) => return Err(e.into()),
        };

        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        file.write_all(STANDARD.encode(key).as_bytes())?;
        file.sync_all()?;

        info!(path = %path.display(), "generated credential key");
        Ok(Self {
            cipher: ChaCha20Poly1305::new(&key),
        })
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, SecretError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| SecretError::Seal)?;

        let mut packed = nonce.to_vec();
        packed.extend_from_slice(&ciphertext);
        Ok(format!("{ENVELOPE}{}", STANDARD.encode(packed)))
    }

    pub fn open(&self, sealed: &str) -> Result<String, SecretError> {
        let body = sealed.strip_prefix(ENVELOPE).ok_or(SecretError::Malformed)?;
        let packed = STANDARD.decode(body).map_err(|_| SecretError::Malformed)?;
        if packed.len() <= NONCE_LEN {
            return Err(SecretError::Malformed);
        }

        let (nonce, ciphertext) = packed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::Open)?;
        String::from_utf8(plaintext).map_err(|_| SecretError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_material_opens_and_hides_plaintext() {
        let sealer = Sealer::generate();
        let material = r#"{"noiseKey":{"private":"abc"},"me":{"id":"1555@s.whatsapp.net"}}"#;
        let sealed = sealer.seal(material).unwrap();
        assert!(sealed.starts_with("v1."));
        assert!(!sealed.contains("noiseKey"));
        assert_eq!(sealer.open(&sealed).unwrap(), material);
    }

    #[test]
    fn each_seal_uses_a_new_nonce() {
        let sealer = Sealer::generate();
        let a = sealer.seal("same-input").unwrap();
        let b = sealer.seal("same-input").unwrap();
        assert_ne!(a, b);
        assert_eq!(sealer.open(&b).unwrap(), "same-input");
    }

    #[test]
    fn other_key_is_rejected() {
        let sealed = Sealer::generate().seal("secret").unwrap();
        assert!(matches!(Sealer::generate().open(&sealed), Err(SecretError::Open)));
    }

    #[test]
    fn flipped_bit_is_rejected() {
        let sealer = Sealer::generate();
        let sealed = sealer.seal("secret").unwrap();
        let mut packed = STANDARD.decode(&sealed[ENVELOPE.len()..]).unwrap();
        if let Some(last) = packed.last_mut() {
            *last ^= 0x01;
        }
        let tampered = format!("{ENVELOPE}{}", STANDARD.encode(packed));
        assert!(matches!(sealer.open(&tampered), Err(SecretError::Open)));
    }

    #[test]
    fn malformed_values() {
        let sealer = Sealer::generate();
        for bad in ["plain-json", "v1.%%%", "v1.AAAA", ""] {
            assert!(matches!(sealer.open(bad), Err(SecretError::Malformed)), "{bad}");
        }
    }

    #[test]
    fn key_file_is_created_once_and_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/secret_key");

        let first = Sealer::from_key_file(&path).unwrap();
        let sealed = first.seal("resume-me").unwrap();
        let second = Sealer::from_key_file(&path).unwrap();
        assert_eq!(second.open(&sealed).unwrap(), "resume-me");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn short_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret_key");
        std::fs::write(&path, STANDARD.encode([1u8; 16])).unwrap();
        assert!(matches!(Sealer::from_key_file(&path), Err(SecretError::BadKey(_))));
    }
}
