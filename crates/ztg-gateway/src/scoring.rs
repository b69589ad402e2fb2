//! Pluggable Traffic Scoring
//!
//! The gateway's default score is the statistical anomaly detector. An
//! injected model (e.g. an ML inference backend) may override it; any model
//! failure falls back to the statistical score locally and is never surfaced
//! to the caller.

/// One scored traffic observation
#[derive(Debug, Clone, Copy)]
pub struct TrafficObservation {
    /// Observed traffic rate (packets per second)
    pub rate: f64,
    /// Session packet counter after this packet
    pub packet_count: u64,
    /// Session byte counter after this packet
    pub byte_count: u64,
    /// Score produced by the statistical detector for this observation
    pub stat_score: f64,
}

/// Optional scoring backend
pub trait ScoringModel: Send + Sync {
    /// Backend name, used in fallback log lines
    fn name(&self) -> &str;

    /// Score an observation; higher means more anomalous
    fn score(&self, observation: &TrafficObservation) -> anyhow::Result<f64>;
}
