//! Micro-Segmentation Checks
//!
//! CIDR containment and named-segment membership. These are the local steps
//! of the enforcement chain; the adapter in `lib.rs` orders them.

use crate::MicrosegDecision;
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// Evaluate an allowed-CIDR list against a destination address
///
/// A destination that does not parse as an IP address is denied: when an
/// operator has pinned a session to CIDRs, anything outside that universe
/// fails closed.
pub fn check_cidrs(allowed_cidrs: &[String], dest_addr: &str) -> MicrosegDecision {
    let ip: IpAddr = match dest_addr.parse() {
        Ok(ip) => ip,
        Err(_) => {
            return MicrosegDecision::deny("cidr_denied")
                .with_detail(serde_json::json!({ "unparseable_destination": dest_addr }));
        }
    };

    for cidr in allowed_cidrs {
        match cidr.parse::<IpNetwork>() {
            Ok(network) if network.contains(ip) => {
                return MicrosegDecision::allow("cidr_allowed")
                    .with_detail(serde_json::json!({ "matched_cidr": cidr }));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(cidr = %cidr, error = %e, "skipping unparseable allowed CIDR");
            }
        }
    }

    MicrosegDecision::deny("cidr_denied")
}

/// Evaluate named-segment membership
pub fn check_segments(allowed_segments: &[String], dest_segment: &str) -> MicrosegDecision {
    if allowed_segments.iter().any(|s| s == dest_segment) {
        MicrosegDecision::allow("segment_allowed")
    } else {
        MicrosegDecision::deny("segment_denied")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_containment() {
        let cidrs = vec!["10.0.0.0/8".to_string()];
        assert!(check_cidrs(&cidrs, "10.1.2.3").allowed);
        assert_eq!(check_cidrs(&cidrs, "10.1.2.3").reason, "cidr_allowed");
        assert!(!check_cidrs(&cidrs, "192.168.1.5").allowed);
        assert_eq!(check_cidrs(&cidrs, "192.168.1.5").reason, "cidr_denied");
    }

    #[test]
    fn test_multiple_cidrs_any_match_wins() {
        let cidrs = vec!["172.16.0.0/12".to_string(), "10.0.0.0/8".to_string()];
        assert!(check_cidrs(&cidrs, "10.255.0.1").allowed);
    }

    #[test]
    fn test_ipv6_cidr() {
        let cidrs = vec!["fd00::/8".to_string()];
        assert!(check_cidrs(&cidrs, "fd12::1").allowed);
        assert!(!check_cidrs(&cidrs, "2001:db8::1").allowed);
    }

    #[test]
    fn test_unparseable_destination_denied() {
        let cidrs = vec!["10.0.0.0/8".to_string()];
        let decision = check_cidrs(&cidrs, "not-an-ip");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "cidr_denied");
    }

    #[test]
    fn test_bad_cidr_entries_skipped() {
        let cidrs = vec!["garbage".to_string(), "10.0.0.0/8".to_string()];
        assert!(check_cidrs(&cidrs, "10.0.0.1").allowed);
    }

    #[test]
    fn test_segment_membership() {
        let segments = vec!["db".to_string(), "cache".to_string()];
        assert!(check_segments(&segments, "db").allowed);
        assert!(!check_segments(&segments, "payments").allowed);
        assert_eq!(check_segments(&segments, "payments").reason, "segment_denied");
    }
}
