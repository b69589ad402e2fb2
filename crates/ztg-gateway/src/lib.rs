//! ZTG Session Gateway
//!
//! Terminates per-device encrypted tunnel sessions:
//!
//! - **Key lifecycle**: per-session AEAD keys, persisted through a sealed
//!   key store, rekeyable without losing the behavioral baseline
//! - **Transport**: AES-256-GCM encrypt/decrypt with self-describing
//!   nonce-prefixed framing, fail-closed on tamper
//! - **Behavioral scoring**: per-session online anomaly detection over the
//!   observed traffic rate, with an optional pluggable scoring backend
//! - **Enforcement**: auto-suspension, micro-segmentation consults, and
//!   adaptive ACL narrowing pushed to the peer-control plane

pub mod anomaly;
pub mod keystore;
pub mod peer;
pub mod scoring;
pub mod session;

pub use anomaly::AnomalyDetector;
pub use keystore::{KeyStore, KeyStoreError, SealingProvider};
pub use peer::PeerControl;
pub use scoring::{ScoringModel, TrafficObservation};
pub use session::{GatewayAction, GatewayStats, ProcessOutcome, SessionGateway, SessionInfo};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Session gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    SessionExists(String),

    #[error("session suspended until {until}")]
    SessionSuspended { until: DateTime<Utc> },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Tampered, truncated, or foreign ciphertext
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    /// AEAD rejected the plaintext (oversized payload)
    #[error("encryption failure")]
    EncryptFailure,

    /// Key material of the wrong shape for the session cipher
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
