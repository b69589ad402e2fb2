//! ZTG Configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ZtgConfig {
    /// Session gateway settings
    pub gateway: GatewayConfig,
    /// Key storage settings
    pub keystore: KeyStoreConfig,
    /// DPI engine settings
    pub dpi: DpiConfig,
    /// Policy adapter settings
    pub policy: PolicyConfig,
}

impl ZtgConfig {
    /// Load from file
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to file
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Session gateway configuration
///
/// Threshold values are operator-tunable; the defaults here are examples,
/// not protocol constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Anomaly score above which a session is auto-suspended
    pub anomaly_threshold: f64,
    /// Anomaly score above which the session ACL is narrowed
    pub narrow_threshold: f64,
    /// Anomaly score below which a previously narrowed ACL is restored
    pub restore_threshold: f64,
    /// Auto-suspension duration in seconds
    pub suspend_secs: u64,
    /// EMA smoothing factor for the per-session anomaly detector
    pub ema_alpha: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: 4.0,
            narrow_threshold: 6.0,
            restore_threshold: 1.0,
            suspend_secs: 300,
            ema_alpha: 0.3,
        }
    }
}

/// Key storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    /// Directory holding one key file per session
    pub key_dir: String,
    /// Environment variable naming the master-key secret
    pub master_secret_env: Option<String>,
    /// Explicit opt-in to plaintext key storage (development only)
    pub allow_insecure: bool,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            key_dir: "/var/lib/ztg/keys".into(),
            master_secret_env: Some("ZTG_MASTER_SECRET".into()),
            allow_insecure: false,
        }
    }
}

/// DPI engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpiConfig {
    /// Verdict server listen address
    pub listen_addr: String,
    /// Signature file path
    pub signature_file: Option<String>,
    /// Maximum accepted request frame size in bytes
    pub max_frame_bytes: usize,
}

impl Default for DpiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9477".into(),
            signature_file: Some("/etc/ztg/signatures.conf".into()),
            max_frame_bytes: 1024 * 1024,
        }
    }
}

/// Policy adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Remote policy engine base URL (None disables the remote hop)
    pub engine_url: Option<String>,
    /// Policy document path under /v1/data/
    pub policy_path: String,
    /// Remote decision timeout in seconds
    pub timeout_secs: u64,
    /// Vendors accepted by the local attestation heuristic
    pub trusted_vendors: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            engine_url: None,
            policy_path: "ztg/authz".into(),
            timeout_secs: 3,
            trusted_vendors: vec![
                "dell".into(),
                "lenovo".into(),
                "hp".into(),
                "apple".into(),
            ],
        }
    }
}
