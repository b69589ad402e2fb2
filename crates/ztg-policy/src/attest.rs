//! Device Attestation
//!
//! Hardware attestor seam plus the local scoring heuristic used when no
//! stronger attestation source answers.

use crate::{AttestationResult, DeviceInfo};
use async_trait::async_trait;
use std::collections::HashSet;

/// Hardware attestation collaborator (TEE/TPM-backed)
///
/// Resolved once at adapter construction. Absence or failure is non-fatal;
/// the decision chain falls through to the next source.
#[async_trait]
pub trait HardwareAttestor: Send + Sync {
    async fn attest(&self, device: &DeviceInfo) -> anyhow::Result<HardwareAttestation>;
}

/// Hardware attestor response
#[derive(Debug, Clone)]
pub struct HardwareAttestation {
    pub attested: bool,
    pub device_id: Option<String>,
}

/// Local posture heuristic
///
/// Score accumulates per signal and clamps to 1.0; a device attests locally
/// at 0.6 or above.
pub fn heuristic_attestation(device: &DeviceInfo, trusted_vendors: &HashSet<String>) -> AttestationResult {
    let mut score: f64 = 0.0;
    let mut reasons = Vec::new();

    if device.secure_boot == Some(true) {
        score += 0.4;
        reasons.push("secure_boot".to_string());
    }

    match device.patch_age_days {
        Some(days) if days <= 30 => {
            score += 0.4;
            reasons.push("patched_recently".to_string());
        }
        Some(days) if days <= 90 => {
            score += 0.2;
            reasons.push("patched_within_quarter".to_string());
        }
        _ => {}
    }

    if let Some(vendor) = &device.vendor {
        if trusted_vendors.contains(&vendor.to_lowercase()) {
            score += 0.2;
            reasons.push("trusted_vendor".to_string());
        }
    }

    let score = score.min(1.0);
    if reasons.is_empty() {
        reasons.push("no_posture_signals".to_string());
    }

    AttestationResult {
        attested: score >= 0.6,
        score,
        reasons,
        claims: device.claims.clone(),
        device_id: device.device_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vendors() -> HashSet<String> {
        ["dell", "lenovo"].iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_full_posture_attests() {
        let device = DeviceInfo {
            device_id: Some("dev-1".into()),
            vendor: Some("Dell".into()),
            secure_boot: Some(true),
            patch_age_days: Some(7),
            claims: Default::default(),
        };
        let result = heuristic_attestation(&device, &vendors());
        assert!(result.attested);
        assert!((result.score - 1.0).abs() < 1e-9);
        assert_eq!(result.device_id.as_deref(), Some("dev-1"));
    }

    #[test]
    fn test_stale_patches_score_lower() {
        let device = DeviceInfo {
            vendor: Some("dell".into()),
            patch_age_days: Some(60),
            ..Default::default()
        };
        let result = heuristic_attestation(&device, &vendors());
        assert!(!result.attested);
        assert!((result.score - 0.4).abs() < 1e-9);
        assert!(result.reasons.contains(&"patched_within_quarter".to_string()));
    }

    #[test]
    fn test_secure_boot_plus_recent_patches_meets_bar() {
        let device = DeviceInfo {
            secure_boot: Some(true),
            patch_age_days: Some(30),
            ..Default::default()
        };
        let result = heuristic_attestation(&device, &vendors());
        assert!(result.attested);
        assert!((result.score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_no_signals() {
        let result = heuristic_attestation(&DeviceInfo::default(), &vendors());
        assert!(!result.attested);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.reasons, vec!["no_posture_signals".to_string()]);
    }
}
