//! DPI Engine
//!
//! Owns the hot-swappable pattern automaton and produces verdicts. A verdict
//! is a pure function of the automaton and the packet bytes; header parsing
//! is best-effort and never changes the drop/accept outcome.

use crate::automaton::PatternAutomaton;
use crate::packet::{self, PacketMeta};
use crate::signatures::Signature;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Inspection outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Accept,
    Drop,
}

/// One signature hit with its matched bytes
///
/// `matched_bytes` is Latin-1 decoded so arbitrary payload bytes survive a
/// JSON round trip; callers on the wire protocol depend on this rendering.
#[derive(Debug, Clone, Serialize)]
pub struct MatchDetail {
    pub sid: u32,
    pub start: usize,
    pub end: usize,
    pub matched_bytes: String,
}

/// Verdict for one packet
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub verdict: VerdictKind,
    pub matches: Vec<u32>,
    pub match_details: Vec<MatchDetail>,
    pub meta: Option<PacketMeta>,
    pub meta_error: Option<String>,
}

impl Verdict {
    /// True when the packet should be dropped
    pub fn is_drop(&self) -> bool {
        self.verdict == VerdictKind::Drop
    }
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub packets_inspected: u64,
    pub packets_dropped: u64,
    pub bytes_scanned: u64,
    pub signature_count: usize,
}

/// Inline inspection engine
///
/// The automaton is immutable once built; `reload` swaps in a replacement
/// atomically, so concurrent verdict queries never block each other.
pub struct DpiEngine {
    automaton: ArcSwap<PatternAutomaton>,
    packets_inspected: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_scanned: AtomicU64,
}

impl DpiEngine {
    /// Create an engine from a prebuilt automaton
    pub fn new(automaton: PatternAutomaton) -> Self {
        Self {
            automaton: ArcSwap::from_pointee(automaton),
            packets_inspected: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            bytes_scanned: AtomicU64::new(0),
        }
    }

    /// Create an engine directly from a signature set
    pub fn from_signatures(signatures: Vec<Signature>) -> Self {
        Self::new(PatternAutomaton::build(signatures))
    }

    /// Replace the signature set
    ///
    /// Builds the new automaton off to the side and swaps it in atomically;
    /// queries in flight finish against the automaton they started with.
    pub fn reload(&self, signatures: Vec<Signature>) {
        let automaton = PatternAutomaton::build(signatures);
        tracing::info!(signatures = automaton.len(), "signature set reloaded");
        self.automaton.store(Arc::new(automaton));
    }

    /// Inspect one packet
    pub fn verdict_for_packet(&self, packet: &[u8]) -> Verdict {
        let automaton = self.automaton.load();
        let hits = automaton.find(packet);

        let matches: Vec<u32> = hits.iter().map(|m| m.sid).collect::<BTreeSet<_>>().into_iter().collect();
        let match_details: Vec<MatchDetail> = hits
            .iter()
            .map(|m| MatchDetail {
                sid: m.sid,
                start: m.start,
                end: m.end,
                matched_bytes: latin1(&packet[m.start..m.end]),
            })
            .collect();

        let (meta, meta_error) = match packet::parse_packet(packet) {
            Ok(meta) => (Some(meta), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let verdict = if matches.is_empty() { VerdictKind::Accept } else { VerdictKind::Drop };

        self.packets_inspected.fetch_add(1, Ordering::Relaxed);
        self.bytes_scanned.fetch_add(packet.len() as u64, Ordering::Relaxed);
        if verdict == VerdictKind::Drop {
            self.packets_dropped.fetch_add(1, Ordering::Relaxed);
        }

        Verdict { verdict, matches, match_details, meta, meta_error }
    }

    /// Counter snapshot
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            packets_inspected: self.packets_inspected.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            signature_count: self.automaton.load().len(),
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DpiEngine {
        DpiEngine::from_signatures(vec![Signature { id: 1, pattern: b"evil".to_vec() }])
    }

    #[test]
    fn test_drop_on_match() {
        let verdict = engine().verdict_for_packet(b"totally evil packet");
        assert!(verdict.is_drop());
        assert_eq!(verdict.matches, vec![1]);
        assert_eq!(verdict.match_details[0].matched_bytes, "evil");
        assert_eq!(verdict.match_details[0].start, 8);
        assert!(verdict.meta.is_none());
        assert!(verdict.meta_error.is_some());
    }

    #[test]
    fn test_accept_on_clean() {
        let verdict = engine().verdict_for_packet(b"clean packet");
        assert_eq!(verdict.verdict, VerdictKind::Accept);
        assert!(verdict.matches.is_empty());
        assert!(verdict.match_details.is_empty());
    }

    #[test]
    fn test_matches_deduped_and_sorted() {
        let engine = DpiEngine::from_signatures(vec![
            Signature { id: 7, pattern: b"aa".to_vec() },
            Signature { id: 2, pattern: b"aaa".to_vec() },
        ]);
        let verdict = engine.verdict_for_packet(b"aaaa");
        assert_eq!(verdict.matches, vec![2, 7]);
        assert!(verdict.match_details.len() > 2);
    }

    #[test]
    fn test_wire_json_shape() {
        let verdict = engine().verdict_for_packet(b"totally evil packet");
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&verdict).unwrap()).unwrap();
        assert_eq!(json["verdict"], "drop");
        assert_eq!(json["matches"], serde_json::json!([1]));
        assert_eq!(json["match_details"][0]["sid"], 1);
        assert!(json["meta"].is_null());
    }

    #[test]
    fn test_latin1_rendering_of_binary_match() {
        let engine = DpiEngine::from_signatures(vec![Signature { id: 3, pattern: vec![0xde, 0xad] }]);
        let verdict = engine.verdict_for_packet(&[0x00, 0xde, 0xad, 0x01]);
        assert_eq!(verdict.match_details[0].matched_bytes, "\u{de}\u{ad}");
    }

    #[test]
    fn test_reload_swaps_signature_set() {
        let engine = engine();
        assert!(engine.verdict_for_packet(b"evil").is_drop());

        engine.reload(vec![Signature { id: 5, pattern: b"worse".to_vec() }]);
        assert!(!engine.verdict_for_packet(b"evil").is_drop());
        assert!(engine.verdict_for_packet(b"worse").is_drop());
    }

    #[test]
    fn test_meta_parsed_for_real_frame() {
        let mut packet = vec![0u8; 28];
        packet[0] = 0x45;
        packet[9] = 17;
        packet[12..16].copy_from_slice(&[192, 168, 0, 1]);
        packet[16..20].copy_from_slice(&[192, 168, 0, 2]);

        let verdict = engine().verdict_for_packet(&packet);
        assert!(verdict.meta_error.is_none());
        let meta = verdict.meta.unwrap();
        assert_eq!(meta.net.unwrap().src_ip.to_string(), "192.168.0.1");
    }

    #[test]
    fn test_stats_accumulate() {
        let engine = engine();
        engine.verdict_for_packet(b"evil");
        engine.verdict_for_packet(b"clean");
        let stats = engine.stats();
        assert_eq!(stats.packets_inspected, 2);
        assert_eq!(stats.packets_dropped, 1);
        assert_eq!(stats.bytes_scanned, 9);
        assert_eq!(stats.signature_count, 1);
    }
}
