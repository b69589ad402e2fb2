//! ZTG Zero-Trust Policy Adapter
//!
//! Attestation scoring and micro-segmentation decisions for tunnel sessions.
//! Both decisions walk a fixed priority chain: stronger external sources
//! first (hardware attestor, remote policy engine), local evaluation next,
//! and a conservative default last. An unreachable external source is logged
//! and skipped, never allowed to decide by failing.

pub mod attest;
pub mod microseg;
pub mod remote;

pub use attest::{HardwareAttestation, HardwareAttestor};
pub use remote::RemotePolicyClient;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use ztg_common::PolicyConfig;

/// Policy adapter errors
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Remote policy engine could not produce a decision
    #[error("policy engine unavailable: {0}")]
    Unavailable(String),

    /// Adapter misconfiguration
    #[error("invalid policy configuration: {0}")]
    Config(String),
}

/// Device facts offered for attestation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub vendor: Option<String>,
    pub secure_boot: Option<bool>,
    pub patch_age_days: Option<u32>,
    /// Free-form claims carried through to the result
    #[serde(default)]
    pub claims: serde_json::Map<String, Value>,
}

/// Attestation outcome
#[derive(Debug, Clone, Serialize)]
pub struct AttestationResult {
    pub attested: bool,
    /// Confidence in [0, 1]
    pub score: f64,
    pub reasons: Vec<String>,
    pub claims: serde_json::Map<String, Value>,
    pub device_id: Option<String>,
}

/// Session facts consulted for micro-segmentation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub role: Option<String>,
    #[serde(default)]
    pub allowed_cidrs: Vec<String>,
    #[serde(default)]
    pub allowed_segments: Vec<String>,
    pub dest_segment: Option<String>,
}

/// Micro-segmentation outcome
#[derive(Debug, Clone, Serialize)]
pub struct MicrosegDecision {
    pub allowed: bool,
    pub reason: String,
    pub details: Option<Value>,
}

impl MicrosegDecision {
    pub fn allow(reason: &str) -> Self {
        Self { allowed: true, reason: reason.to_string(), details: None }
    }

    pub fn deny(reason: &str) -> Self {
        Self { allowed: false, reason: reason.to_string(), details: None }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.details = Some(detail);
        self
    }
}

/// Zero-trust policy adapter
///
/// Collaborators are resolved once at construction; there is no per-call
/// capability probing.
pub struct ZeroTrustPolicyAdapter {
    hardware: Option<Arc<dyn HardwareAttestor>>,
    remote: Option<RemotePolicyClient>,
    trusted_vendors: HashSet<String>,
}

impl ZeroTrustPolicyAdapter {
    pub fn new(config: &PolicyConfig) -> Result<Self, PolicyError> {
        let remote = match &config.engine_url {
            Some(url) => Some(RemotePolicyClient::new(
                url,
                &config.policy_path,
                Duration::from_secs(config.timeout_secs),
            )?),
            None => None,
        };

        Ok(Self {
            hardware: None,
            remote,
            trusted_vendors: config.trusted_vendors.iter().map(|v| v.to_lowercase()).collect(),
        })
    }

    /// Attach a hardware attestation collaborator
    pub fn with_hardware_attestor(mut self, attestor: Arc<dyn HardwareAttestor>) -> Self {
        self.hardware = Some(attestor);
        self
    }

    /// Score a device through the attestation chain
    ///
    /// Hardware attestation wins outright; a configured remote engine is
    /// consulted next; the local posture heuristic always answers last.
    pub async fn attest_device(&self, device: &DeviceInfo) -> AttestationResult {
        if let Some(hardware) = &self.hardware {
            match hardware.attest(device).await {
                Ok(att) if att.attested => {
                    return AttestationResult {
                        attested: true,
                        score: 1.0,
                        reasons: vec!["hardware_attested".to_string()],
                        claims: device.claims.clone(),
                        device_id: att.device_id.or_else(|| device.device_id.clone()),
                    };
                }
                Ok(_) => {
                    tracing::debug!("hardware attestor declined, falling through");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "hardware attestor failed, falling through");
                }
            }
        }

        if let Some(remote) = &self.remote {
            let input = serde_json::json!({ "device": device });
            match remote.decide(&input).await {
                Ok(result) => {
                    if let Some(decision) = remote_attestation(&result, device) {
                        return decision;
                    }
                    tracing::warn!("policy engine attestation lacked an allowed field, falling through");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "policy engine unavailable for attestation");
                }
            }
        }

        attest::heuristic_attestation(device, &self.trusted_vendors)
    }

    /// Decide whether a session may reach a destination
    pub async fn enforce_microsegmentation(
        &self,
        session: &SessionMeta,
        dest_addr: Option<&str>,
        proto: Option<&str>,
    ) -> MicrosegDecision {
        if session.role.as_deref() == Some("admin") {
            return MicrosegDecision::allow("admin_bypass");
        }

        if let Some(remote) = &self.remote {
            let input = serde_json::json!({
                "session": session,
                "dest_addr": dest_addr,
                "proto": proto,
            });
            match remote.decide(&input).await {
                Ok(result) => {
                    if let Some(allowed) = result.get("allowed").and_then(Value::as_bool) {
                        let reason = result
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or("policy_engine")
                            .to_string();
                        return MicrosegDecision { allowed, reason, details: Some(result) };
                    }
                    tracing::warn!("policy engine decision lacked an allowed field, falling through");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "policy engine unavailable for microsegmentation");
                }
            }
        }

        if let Some(dest) = dest_addr {
            if !session.allowed_cidrs.is_empty() {
                return microseg::check_cidrs(&session.allowed_cidrs, dest);
            }
        }

        if !session.allowed_segments.is_empty() {
            if let Some(dest_segment) = session.dest_segment.as_deref() {
                return microseg::check_segments(&session.allowed_segments, dest_segment);
            }
        }

        if dest_addr.is_none() {
            return MicrosegDecision::allow("no_dest_specified");
        }

        MicrosegDecision::deny("default_deny")
    }
}

fn remote_attestation(result: &Value, device: &DeviceInfo) -> Option<AttestationResult> {
    let attested = result.get("allowed").and_then(Value::as_bool)?;
    let score = result
        .get("score")
        .and_then(Value::as_f64)
        .unwrap_or(if attested { 1.0 } else { 0.0 })
        .clamp(0.0, 1.0);
    let reasons = result
        .get("reasons")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_else(|| vec!["policy_engine".to_string()]);

    Some(AttestationResult {
        attested,
        score,
        reasons,
        claims: device.claims.clone(),
        device_id: device.device_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn adapter() -> ZeroTrustPolicyAdapter {
        ZeroTrustPolicyAdapter::new(&PolicyConfig::default()).unwrap()
    }

    fn meta_with_cidrs(cidrs: &[&str]) -> SessionMeta {
        SessionMeta {
            session_id: "s1".into(),
            allowed_cidrs: cidrs.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Serve one canned JSON decision on an ephemeral port.
    async fn canned_engine(result: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = format!("{{\"result\":{}}}", result);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
                if seen.windows(4).any(|w| w == b"\r\n\r\n") && seen.ends_with(b"}") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_admin_bypass() {
        let meta = SessionMeta {
            role: Some("admin".into()),
            allowed_cidrs: vec!["10.0.0.0/8".into()],
            ..Default::default()
        };
        // Destination far outside any configured CIDR still passes.
        let decision = adapter().enforce_microsegmentation(&meta, Some("203.0.113.9"), None).await;
        assert!(decision.allowed);
        assert_eq!(decision.reason, "admin_bypass");
    }

    #[tokio::test]
    async fn test_cidr_chain_step() {
        let meta = meta_with_cidrs(&["10.0.0.0/8"]);
        let adapter = adapter();

        let decision = adapter.enforce_microsegmentation(&meta, Some("10.1.2.3"), None).await;
        assert!(decision.allowed);
        assert_eq!(decision.reason, "cidr_allowed");

        let decision = adapter.enforce_microsegmentation(&meta, Some("192.168.1.5"), None).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "cidr_denied");
    }

    #[tokio::test]
    async fn test_segment_chain_step() {
        let meta = SessionMeta {
            session_id: "s2".into(),
            allowed_segments: vec!["db".into()],
            dest_segment: Some("db".into()),
            ..Default::default()
        };
        let decision = adapter().enforce_microsegmentation(&meta, Some("10.0.0.1"), None).await;
        assert!(decision.allowed);
        assert_eq!(decision.reason, "segment_allowed");
    }

    #[tokio::test]
    async fn test_no_destination_allows() {
        let decision = adapter()
            .enforce_microsegmentation(&SessionMeta::default(), None, None)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.reason, "no_dest_specified");
    }

    #[tokio::test]
    async fn test_default_deny() {
        let decision = adapter()
            .enforce_microsegmentation(&SessionMeta::default(), Some("10.0.0.1"), None)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "default_deny");
    }

    #[tokio::test]
    async fn test_remote_decision_passes_through() {
        let url = canned_engine(r#"{"allowed":false,"reason":"engine_denied"}"#).await;
        let config = PolicyConfig { engine_url: Some(url), ..Default::default() };
        let adapter = ZeroTrustPolicyAdapter::new(&config).unwrap();

        let meta = meta_with_cidrs(&["10.0.0.0/8"]);
        // The engine's deny overrides what the CIDR step would have allowed.
        let decision = adapter.enforce_microsegmentation(&meta, Some("10.0.0.1"), None).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "engine_denied");
        assert!(decision.details.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_engine_falls_through_to_cidrs() {
        let config = PolicyConfig {
            engine_url: Some("http://127.0.0.1:9".into()),
            timeout_secs: 1,
            ..Default::default()
        };
        let adapter = ZeroTrustPolicyAdapter::new(&config).unwrap();

        let meta = meta_with_cidrs(&["10.0.0.0/8"]);
        let decision = adapter.enforce_microsegmentation(&meta, Some("10.1.2.3"), None).await;
        assert!(decision.allowed);
        assert_eq!(decision.reason, "cidr_allowed");
    }

    struct StaticAttestor(bool);

    #[async_trait]
    impl HardwareAttestor for StaticAttestor {
        async fn attest(&self, _device: &DeviceInfo) -> anyhow::Result<HardwareAttestation> {
            if self.0 {
                Ok(HardwareAttestation { attested: true, device_id: Some("tpm-7".into()) })
            } else {
                anyhow::bail!("attestation bus offline")
            }
        }
    }

    #[tokio::test]
    async fn test_hardware_attestation_wins() {
        let adapter = adapter().with_hardware_attestor(Arc::new(StaticAttestor(true)));
        let result = adapter.attest_device(&DeviceInfo::default()).await;
        assert!(result.attested);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.device_id.as_deref(), Some("tpm-7"));
        assert_eq!(result.reasons, vec!["hardware_attested".to_string()]);
    }

    #[tokio::test]
    async fn test_hardware_failure_falls_back_to_heuristic() {
        let adapter = adapter().with_hardware_attestor(Arc::new(StaticAttestor(false)));
        let device = DeviceInfo {
            secure_boot: Some(true),
            patch_age_days: Some(5),
            ..Default::default()
        };
        let result = adapter.attest_device(&device).await;
        assert!(result.attested);
        assert!((result.score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_remote_attestation_passthrough() {
        let url = canned_engine(r#"{"allowed":true,"score":0.9,"reasons":["mdm_enrolled"]}"#).await;
        let config = PolicyConfig { engine_url: Some(url), ..Default::default() };
        let adapter = ZeroTrustPolicyAdapter::new(&config).unwrap();

        let result = adapter.attest_device(&DeviceInfo::default()).await;
        assert!(result.attested);
        assert!((result.score - 0.9).abs() < 1e-9);
        assert_eq!(result.reasons, vec!["mdm_enrolled".to_string()]);
    }
}
