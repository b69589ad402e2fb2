//! Session Key Storage
//!
//! One file per session under a configured directory. Keys at rest are
//! protected by, in priority order: a hardware sealing collaborator, AEAD
//! under a master key derived from an operator secret, or an explicit
//! development-only plaintext opt-in. With no backend configured, saving
//! fails rather than silently downgrading to plaintext.
//!
//! Each file starts with a 4-byte ASCII tag naming its protection scheme so
//! loads dispatch correctly and unknown formats are rejected loudly.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const TAG_SEALED: &[u8; 4] = b"SEAL";
const TAG_AEAD: &[u8; 4] = b"AEAD";
const TAG_PLAIN: &[u8; 4] = b"PLN0";

const NONCE_LEN: usize = 12;

/// Key store errors
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// No protection backend configured; refusing to store plaintext
    #[error("no secure key storage backend configured")]
    NoSecureBackend,

    /// Hardware sealing collaborator failed
    #[error("sealing provider failure: {0}")]
    Sealing(String),

    /// Stored key failed decryption or authentication
    #[error("stored key failed authentication")]
    Unsealable,

    /// File carries an unknown or foreign protection tag
    #[error("unrecognized key file format: {0}")]
    UnknownFormat(String),

    #[error("key IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hardware-backed sealing collaborator (TEE/TPM)
pub trait SealingProvider: Send + Sync {
    fn seal(&self, session_id: &str, plaintext: &[u8]) -> anyhow::Result<Vec<u8>>;
    fn unseal(&self, session_id: &str, blob: &[u8]) -> anyhow::Result<Vec<u8>>;
}

enum Protection {
    Sealed(Arc<dyn SealingProvider>),
    Master(Box<Aes256Gcm>),
    Insecure,
}

/// Per-session key persistence
pub struct KeyStore {
    dir: PathBuf,
    protection: Option<Protection>,
}

impl KeyStore {
    /// Store sealing keys through a hardware collaborator
    pub fn sealed(dir: impl Into<PathBuf>, provider: Arc<dyn SealingProvider>) -> Self {
        Self { dir: dir.into(), protection: Some(Protection::Sealed(provider)) }
    }

    /// Derive a master key from an operator-supplied secret
    pub fn with_master_secret(dir: impl Into<PathBuf>, secret: &[u8]) -> Self {
        let digest = Sha256::digest(secret);
        let cipher = Aes256Gcm::new_from_slice(&digest).expect("sha256 digest is a valid aes-256 key");
        Self { dir: dir.into(), protection: Some(Protection::Master(Box::new(cipher))) }
    }

    /// Plaintext storage for local development only
    pub fn insecure_for_development(dir: impl Into<PathBuf>) -> Self {
        tracing::warn!("key store running with INSECURE plaintext storage");
        Self { dir: dir.into(), protection: Some(Protection::Insecure) }
    }

    /// A store with no backend; every save fails with `NoSecureBackend`
    pub fn unconfigured(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), protection: None }
    }

    /// Resolve a store from configuration
    ///
    /// Preference order: master secret from the configured environment
    /// variable, then the explicit insecure opt-in, then an unconfigured
    /// store. Hardware sealing is wired programmatically via `sealed`, not
    /// through configuration.
    pub fn from_config(config: &ztg_common::KeyStoreConfig) -> Self {
        if let Some(env) = &config.master_secret_env {
            match std::env::var(env) {
                Ok(secret) => {
                    return Self::with_master_secret(config.key_dir.clone(), secret.as_bytes())
                }
                Err(_) => tracing::warn!(env = %env, "master secret env var not set"),
            }
        }
        if config.allow_insecure {
            return Self::insecure_for_development(config.key_dir.clone());
        }
        Self::unconfigured(config.key_dir.clone())
    }

    /// Persist a session key
    pub fn save_key(&self, session_id: &str, key: &[u8]) -> Result<(), KeyStoreError> {
        let protection = self.protection.as_ref().ok_or(KeyStoreError::NoSecureBackend)?;

        let (tag, payload) = match protection {
            Protection::Sealed(provider) => {
                let blob = provider
                    .seal(session_id, key)
                    .map_err(|e| KeyStoreError::Sealing(e.to_string()))?;
                (TAG_SEALED, blob)
            }
            Protection::Master(cipher) => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, Payload { msg: key, aad: session_id.as_bytes() })
                    .map_err(|_| KeyStoreError::Unsealable)?;
                let mut payload = nonce.to_vec();
                payload.extend_from_slice(&ciphertext);
                (TAG_AEAD, payload)
            }
            Protection::Insecure => (TAG_PLAIN, key.to_vec()),
        };

        std::fs::create_dir_all(&self.dir)?;
        let path = self.key_path(session_id);
        let tmp = path.with_extension("tmp");

        let mut contents = tag.to_vec();
        contents.extend_from_slice(&payload);
        std::fs::write(&tmp, &contents)?;
        // Rename is atomic on the same filesystem; a crash mid-save leaves
        // the previous key file intact.
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load a session key
    ///
    /// `Ok(None)` means no key is stored. Decode and authentication failures
    /// are errors, never `None`.
    pub fn load_key(&self, session_id: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        let path = self.key_path(session_id);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if contents.len() < 4 {
            return Err(KeyStoreError::UnknownFormat("short key file".into()));
        }
        let (tag, payload) = contents.split_at(4);

        let key = match (tag, self.protection.as_ref()) {
            (t, Some(Protection::Sealed(provider))) if t == TAG_SEALED => provider
                .unseal(session_id, payload)
                .map_err(|e| KeyStoreError::Sealing(e.to_string()))?,
            (t, Some(Protection::Master(cipher))) if t == TAG_AEAD => {
                if payload.len() < NONCE_LEN {
                    return Err(KeyStoreError::UnknownFormat("truncated AEAD payload".into()));
                }
                let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
                cipher
                    .decrypt(
                        Nonce::from_slice(nonce),
                        Payload { msg: ciphertext, aad: session_id.as_bytes() },
                    )
                    .map_err(|_| KeyStoreError::Unsealable)?
            }
            (t, Some(Protection::Insecure)) if t == TAG_PLAIN => payload.to_vec(),
            (t, _) => {
                let tag = String::from_utf8_lossy(t).into_owned();
                return Err(KeyStoreError::UnknownFormat(format!(
                    "key stored under scheme {:?} which is not configured",
                    tag
                )));
            }
        };

        Ok(Some(key))
    }

    /// Remove a persisted key, best-effort
    pub fn delete_key(&self, session_id: &str) {
        let path = self.key_path(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(session_id, error = %e, "failed to purge session key"),
        }
    }

    // Session ids are caller-supplied strings; hash them into stable file
    // names so they cannot traverse outside the key directory.
    fn key_path(&self, session_id: &str) -> PathBuf {
        let digest = Sha256::digest(session_id.as_bytes());
        self.dir.join(format!("{}.key", hex::encode(&digest[..16])))
    }
}

impl KeyStore {
    /// Directory this store writes under
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::with_master_secret(dir.path(), b"operator secret");

        store.save_key("sess-1", &[7u8; 32]).unwrap();
        assert_eq!(store.load_key("sess-1").unwrap(), Some(vec![7u8; 32]));
    }

    #[test]
    fn test_absent_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::with_master_secret(dir.path(), b"s");
        assert_eq!(store.load_key("nobody").unwrap(), None);
    }

    #[test]
    fn test_no_backend_refuses_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::unconfigured(dir.path());
        assert!(matches!(
            store.save_key("sess-1", &[0u8; 32]),
            Err(KeyStoreError::NoSecureBackend)
        ));
        // And nothing was written.
        assert_eq!(store.load_key("sess-1").unwrap(), None);
    }

    #[test]
    fn test_tampered_file_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::with_master_secret(dir.path(), b"s");
        store.save_key("sess-1", &[1u8; 32]).unwrap();

        let path = store.key_path("sess-1");
        let mut contents = std::fs::read(&path).unwrap();
        let last = contents.len() - 1;
        contents[last] ^= 0xff;
        std::fs::write(&path, contents).unwrap();

        assert!(matches!(store.load_key("sess-1"), Err(KeyStoreError::Unsealable)));
    }

    #[test]
    fn test_wrong_master_secret_fails() {
        let dir = tempfile::tempdir().unwrap();
        KeyStore::with_master_secret(dir.path(), b"right")
            .save_key("sess-1", &[2u8; 32])
            .unwrap();

        let other = KeyStore::with_master_secret(dir.path(), b"wrong");
        assert!(matches!(other.load_key("sess-1"), Err(KeyStoreError::Unsealable)));
    }

    #[test]
    fn test_foreign_tag_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let insecure = KeyStore::insecure_for_development(dir.path());
        insecure.save_key("sess-1", &[3u8; 32]).unwrap();

        // A master-key store must not silently accept a plaintext file.
        let secure = KeyStore::with_master_secret(dir.path(), b"s");
        assert!(matches!(secure.load_key("sess-1"), Err(KeyStoreError::UnknownFormat(_))));
    }

    #[test]
    fn test_delete_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::with_master_secret(dir.path(), b"s");
        store.save_key("sess-1", &[4u8; 32]).unwrap();
        store.delete_key("sess-1");
        assert_eq!(store.load_key("sess-1").unwrap(), None);
        // Deleting again is harmless.
        store.delete_key("sess-1");
    }

    #[test]
    fn test_from_config_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap().to_string();

        // Env-provided master secret wins.
        std::env::set_var("ZTG_TEST_MASTER_SECRET", "hunter2");
        let config = ztg_common::KeyStoreConfig {
            key_dir: dir_str.clone(),
            master_secret_env: Some("ZTG_TEST_MASTER_SECRET".into()),
            allow_insecure: false,
        };
        let store = KeyStore::from_config(&config);
        store.save_key("sess-1", &[1u8; 32]).unwrap();
        assert_eq!(store.load_key("sess-1").unwrap(), Some(vec![1u8; 32]));

        // Missing secret with no insecure opt-in refuses to store.
        let config = ztg_common::KeyStoreConfig {
            key_dir: dir_str.clone(),
            master_secret_env: Some("ZTG_TEST_MISSING_SECRET".into()),
            allow_insecure: false,
        };
        let store = KeyStore::from_config(&config);
        assert!(matches!(
            store.save_key("sess-2", &[2u8; 32]),
            Err(KeyStoreError::NoSecureBackend)
        ));

        // Missing secret with the explicit opt-in stores plaintext.
        let config = ztg_common::KeyStoreConfig {
            key_dir: dir_str,
            master_secret_env: Some("ZTG_TEST_MISSING_SECRET".into()),
            allow_insecure: true,
        };
        let store = KeyStore::from_config(&config);
        store.save_key("sess-3", &[3u8; 32]).unwrap();
        assert_eq!(store.load_key("sess-3").unwrap(), Some(vec![3u8; 32]));
    }

    struct XorSealer;

    impl SealingProvider for XorSealer {
        fn seal(&self, _session_id: &str, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(plaintext.iter().map(|b| b ^ 0x5a).collect())
        }

        fn unseal(&self, _session_id: &str, blob: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(blob.iter().map(|b| b ^ 0x5a).collect())
        }
    }

    #[test]
    fn test_sealed_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::sealed(dir.path(), Arc::new(XorSealer));
        store.save_key("sess-1", &[9u8; 32]).unwrap();
        assert_eq!(store.load_key("sess-1").unwrap(), Some(vec![9u8; 32]));

        // File on disk is not the raw key.
        let on_disk = std::fs::read(store.key_path("sess-1")).unwrap();
        assert_eq!(&on_disk[..4], TAG_SEALED);
        assert_ne!(&on_disk[4..], &[9u8; 32]);
    }
}
