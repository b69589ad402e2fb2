//! Session Gateway
//!
//! Owns the session registry and the per-session inbound processing chain:
//! decrypt, count, score, and enforce. The registry sits behind one
//! exclusive lock, so mutations of the same session serialize in call
//! order; cryptographic and matching work runs outside the lock.

use crate::anomaly::AnomalyDetector;
use crate::keystore::KeyStore;
use crate::peer::PeerControl;
use crate::scoring::{ScoringModel, TrafficObservation};
use crate::{GatewayError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ztg_common::GatewayConfig;
use ztg_dpi::{DpiEngine, PacketMeta, Verdict};
use ztg_policy::{SessionMeta, ZeroTrustPolicyAdapter};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

struct Session {
    cipher: Aes256Gcm,
    created_at: DateTime<Utc>,
    last_seen: Option<DateTime<Utc>>,
    packet_count: u64,
    byte_count: u64,
    suspended_until: Option<DateTime<Utc>>,
    detector: AnomalyDetector,
    meta: SessionMeta,
    current_allowed_ips: Option<Vec<String>>,
    previous_allowed_ips: Option<Vec<String>>,
    peer_identity: Option<String>,
}

/// Caller-facing session snapshot, without key material
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub packet_count: u64,
    pub byte_count: u64,
    pub suspended_until: Option<DateTime<Utc>>,
    pub current_allowed_ips: Option<Vec<String>>,
    pub previous_allowed_ips: Option<Vec<String>>,
    pub peer_identity: Option<String>,
}

/// Enforcement applied during one `process_incoming` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct GatewayAction {
    pub suspended_until: Option<DateTime<Utc>>,
    pub narrowed_to: Option<Vec<String>>,
    pub restored_to: Option<Vec<String>>,
}

impl GatewayAction {
    fn into_option(self) -> Option<Self> {
        if self.suspended_until.is_none() && self.narrowed_to.is_none() && self.restored_to.is_none()
        {
            None
        } else {
            Some(self)
        }
    }
}

/// Result of processing one inbound encrypted unit
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub plaintext: Vec<u8>,
    pub anomaly_score: f64,
    /// Parsed headers from the inline inspection pass, when available
    pub meta: Option<PacketMeta>,
    /// Full DPI verdict, when an engine is attached
    pub verdict: Option<Verdict>,
    pub action: Option<GatewayAction>,
}

/// Gateway counters
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayStats {
    pub active_sessions: usize,
    pub suspended_sessions: usize,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub packets_processed: u64,
    pub packets_dropped: u64,
    pub decrypt_failures: u64,
    pub suspensions: u64,
}

#[derive(Default)]
struct Counters {
    sessions_created: AtomicU64,
    sessions_closed: AtomicU64,
    packets_processed: AtomicU64,
    packets_dropped: AtomicU64,
    decrypt_failures: AtomicU64,
    suspensions: AtomicU64,
}

/// Session gateway
pub struct SessionGateway {
    sessions: Mutex<HashMap<String, Session>>,
    keystore: KeyStore,
    config: GatewayConfig,
    policy: Option<Arc<ZeroTrustPolicyAdapter>>,
    dpi: Option<Arc<DpiEngine>>,
    peers: Option<Arc<dyn PeerControl>>,
    model: Option<Arc<dyn ScoringModel>>,
    counters: Counters,
}

impl SessionGateway {
    pub fn new(config: GatewayConfig, keystore: KeyStore) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            keystore,
            config,
            policy: None,
            dpi: None,
            peers: None,
            model: None,
            counters: Counters::default(),
        }
    }

    /// Attach the micro-segmentation policy adapter
    pub fn with_policy(mut self, policy: Arc<ZeroTrustPolicyAdapter>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Attach an inline DPI engine for plaintext inspection
    pub fn with_dpi(mut self, dpi: Arc<DpiEngine>) -> Self {
        self.dpi = Some(dpi);
        self
    }

    /// Attach the peer-control plane receiving ACL updates
    pub fn with_peer_control(mut self, peers: Arc<dyn PeerControl>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Attach an optional scoring backend
    pub fn with_scoring_model(mut self, model: Arc<dyn ScoringModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Create a session, generating or reusing key material
    ///
    /// With no key supplied, a previously persisted key is reused before a
    /// fresh one is generated. The resulting key is persisted; key-store
    /// failures abort the creation.
    pub fn create_session(&self, session_id: &str, key: Option<Vec<u8>>) -> Result<SessionInfo> {
        if self.sessions.lock().contains_key(session_id) {
            return Err(GatewayError::SessionExists(session_id.to_string()));
        }

        let key = match key {
            Some(key) => key,
            None => match self.keystore.load_key(session_id)? {
                Some(key) => key,
                None => generate_key(),
            },
        };
        let cipher = build_cipher(&key)?;
        self.keystore.save_key(session_id, &key)?;

        let session = Session {
            cipher,
            created_at: Utc::now(),
            last_seen: None,
            packet_count: 0,
            byte_count: 0,
            suspended_until: None,
            detector: AnomalyDetector::new(self.config.ema_alpha),
            meta: SessionMeta { session_id: session_id.to_string(), ..Default::default() },
            current_allowed_ips: None,
            previous_allowed_ips: None,
            peer_identity: None,
        };

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session_id) {
            return Err(GatewayError::SessionExists(session_id.to_string()));
        }
        let info = snapshot(session_id, &session);
        sessions.insert(session_id.to_string(), session);
        drop(sessions);

        self.counters.sessions_created.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session_id, "session created");
        Ok(info)
    }

    /// Remove a session and purge its persisted key
    pub fn close_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().remove(session_id).is_some();
        if removed {
            self.keystore.delete_key(session_id);
            self.counters.sessions_closed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(session_id, "session closed");
        }
        removed
    }

    /// Replace key material, keeping the behavioral baseline
    ///
    /// Traffic counters reset; the anomaly detector is untouched so the
    /// session keeps its learned baseline across the rekey.
    pub fn rekey_session(&self, session_id: &str) -> Result<bool> {
        if !self.sessions.lock().contains_key(session_id) {
            return Ok(false);
        }

        let key = generate_key();
        let cipher = build_cipher(&key)?;
        self.keystore.save_key(session_id, &key)?;

        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.cipher = cipher;
                session.packet_count = 0;
                session.byte_count = 0;
                tracing::info!(session_id, "session rekeyed");
                Ok(true)
            }
            None => {
                // Closed while we were persisting; drop the orphaned key.
                drop(sessions);
                self.keystore.delete_key(session_id);
                Ok(false)
            }
        }
    }

    /// Suspend until the given instant; `None` clears the suspension
    pub fn suspend_session(
        &self,
        session_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;
        session.suspended_until = until;
        Ok(())
    }

    /// True iff a suspension deadline is set and still in the future
    pub fn is_suspended(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .and_then(|s| s.suspended_until)
            .map(|until| until > Utc::now())
            .unwrap_or(false)
    }

    /// Attach policy metadata consulted during micro-segmentation
    pub fn set_session_meta(&self, session_id: &str, meta: SessionMeta) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;
        session.meta = meta;
        Ok(())
    }

    /// Seed the session's network ACL and peer identity
    pub fn set_network_acl(
        &self,
        session_id: &str,
        allowed_ips: Vec<String>,
        peer_identity: Option<String>,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;
        session.current_allowed_ips = Some(allowed_ips);
        session.peer_identity = peer_identity;
        Ok(())
    }

    /// Encrypt for a session; fails while suspended
    pub fn encrypt_for_session(
        &self,
        session_id: &str,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = self.cipher_for(session_id)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|_| GatewayError::EncryptFailure)?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a nonce-prefixed blob; fails closed on tamper or truncation
    pub fn decrypt_for_session(
        &self,
        session_id: &str,
        blob: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = self.cipher_for(session_id)?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(GatewayError::InvalidCiphertext);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| GatewayError::InvalidCiphertext)
    }

    /// Process one inbound encrypted unit
    ///
    /// Decrypts, updates traffic state, scores the observation, and applies
    /// policy: auto-suspension above the anomaly threshold, a
    /// micro-segmentation consult for the supplied destination (a deny
    /// suspends and fails the call), ACL narrowing and restoration around
    /// the narrow/restore thresholds, and an optional inline DPI verdict.
    pub async fn process_incoming(
        &self,
        session_id: &str,
        blob: &[u8],
        destination: Option<&str>,
    ) -> Result<ProcessOutcome> {
        // Failed decrypts must leave counters and timestamps untouched.
        let plaintext = match self.decrypt_for_session(session_id, blob, b"") {
            Ok(plaintext) => plaintext,
            Err(e) => {
                if matches!(e, GatewayError::InvalidCiphertext) {
                    self.counters.decrypt_failures.fetch_add(1, Ordering::Relaxed);
                }
                return Err(e);
            }
        };

        let now = Utc::now();

        let (stat_score, observation, policy_meta) = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;

            session.packet_count += 1;
            session.byte_count += plaintext.len() as u64;

            let rate = match session.last_seen {
                Some(prev) => {
                    let dt = (now - prev).num_milliseconds() as f64 / 1000.0;
                    if dt > 0.0 {
                        1.0 / dt
                    } else {
                        session.packet_count as f64
                    }
                }
                None => session.packet_count as f64,
            };
            session.last_seen = Some(now);

            let stat_score = session.detector.update(rate);
            let observation = TrafficObservation {
                rate,
                packet_count: session.packet_count,
                byte_count: session.byte_count,
                stat_score,
            };
            (stat_score, observation, session.meta.clone())
        };
        self.counters.packets_processed.fetch_add(1, Ordering::Relaxed);

        let score = match &self.model {
            Some(model) => match model.score(&observation) {
                Ok(score) => score,
                Err(e) => {
                    tracing::warn!(
                        model = model.name(),
                        error = %e,
                        "scoring model failed, falling back to statistical score"
                    );
                    stat_score
                }
            },
            None => stat_score,
        };

        let mut action = GatewayAction::default();

        if score > self.config.anomaly_threshold {
            let until = now + Duration::seconds(self.config.suspend_secs as i64);
            self.suspend_internal(session_id, until);
            tracing::warn!(session_id, score, "anomalous session auto-suspended");
            action.suspended_until = Some(until);
        }

        if let (Some(dest), Some(policy)) = (destination, &self.policy) {
            let decision = policy.enforce_microsegmentation(&policy_meta, Some(dest), None).await;
            if !decision.allowed {
                let until = now + Duration::seconds(self.config.suspend_secs as i64);
                self.suspend_internal(session_id, until);
                tracing::warn!(
                    session_id,
                    dest,
                    reason = %decision.reason,
                    "microsegmentation denied, session suspended"
                );
                return Err(GatewayError::PermissionDenied(decision.reason));
            }
        }

        let mut peer_push: Option<(Option<String>, Vec<String>)> = None;

        if score > self.config.narrow_threshold {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(session_id) {
                // Capture the pre-narrowing ACL once; repeated narrowing
                // must not overwrite the saved value.
                if session.previous_allowed_ips.is_none() {
                    session.previous_allowed_ips =
                        Some(session.current_allowed_ips.clone().unwrap_or_default());
                }
                let narrowed = vec![host_rule(destination)];
                session.current_allowed_ips = Some(narrowed.clone());
                peer_push = Some((session.peer_identity.clone(), narrowed.clone()));
                tracing::warn!(session_id, score, acl = ?narrowed, "session ACL narrowed");
                action.narrowed_to = Some(narrowed);
            }
        }

        if score < self.config.restore_threshold {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(session_id) {
                if let Some(previous) = session.previous_allowed_ips.take() {
                    session.current_allowed_ips = Some(previous.clone());
                    peer_push = Some((session.peer_identity.clone(), previous.clone()));
                    tracing::info!(session_id, acl = ?previous, "session ACL restored");
                    action.restored_to = Some(previous);
                }
            }
        }

        // ACL pushes are best-effort; the decrypt path never fails on them.
        if let (Some(peers), Some((identity, ips))) = (&self.peers, peer_push) {
            let public_key = identity.unwrap_or_default();
            if let Err(e) = peers.add_peer(session_id, &public_key, &ips).await {
                tracing::warn!(session_id, error = %e, "peer control update failed");
            }
        }

        let (verdict, meta) = match &self.dpi {
            Some(dpi) => {
                let verdict = dpi.verdict_for_packet(&plaintext);
                if verdict.is_drop() {
                    self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                }
                let meta = verdict.meta.clone();
                (Some(verdict), meta)
            }
            None => (None, None),
        };

        Ok(ProcessOutcome {
            plaintext,
            anomaly_score: score,
            meta,
            verdict,
            action: action.into_option(),
        })
    }

    /// Remove sessions idle past `max_idle`, purging their keys
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| now - s.last_seen.unwrap_or(s.created_at) > max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                sessions.remove(id);
            }
            ids
        };

        for id in &expired {
            self.keystore.delete_key(id);
            self.counters.sessions_closed.fetch_add(1, Ordering::Relaxed);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired idle sessions");
        }
        expired.len()
    }

    /// Snapshot one session
    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.lock().get(session_id).map(|s| snapshot(session_id, s))
    }

    /// Snapshot all live sessions
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.lock().iter().map(|(id, s)| snapshot(id, s)).collect()
    }

    /// Counter snapshot
    pub fn stats(&self) -> GatewayStats {
        let now = Utc::now();
        let (active, suspended) = {
            let sessions = self.sessions.lock();
            let suspended = sessions
                .values()
                .filter(|s| s.suspended_until.map(|u| u > now).unwrap_or(false))
                .count();
            (sessions.len(), suspended)
        };

        GatewayStats {
            active_sessions: active,
            suspended_sessions: suspended,
            sessions_created: self.counters.sessions_created.load(Ordering::Relaxed),
            sessions_closed: self.counters.sessions_closed.load(Ordering::Relaxed),
            packets_processed: self.counters.packets_processed.load(Ordering::Relaxed),
            packets_dropped: self.counters.packets_dropped.load(Ordering::Relaxed),
            decrypt_failures: self.counters.decrypt_failures.load(Ordering::Relaxed),
            suspensions: self.counters.suspensions.load(Ordering::Relaxed),
        }
    }

    fn suspend_internal(&self, session_id: &str, until: DateTime<Utc>) {
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.suspended_until = Some(until);
            self.counters.suspensions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn cipher_for(&self, session_id: &str) -> Result<Aes256Gcm> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;
        if let Some(until) = session.suspended_until {
            if until > Utc::now() {
                return Err(GatewayError::SessionSuspended { until });
            }
        }
        Ok(session.cipher.clone())
    }
}

fn snapshot(session_id: &str, session: &Session) -> SessionInfo {
    SessionInfo {
        session_id: session_id.to_string(),
        created_at: session.created_at,
        last_seen: session.last_seen,
        packet_count: session.packet_count,
        byte_count: session.byte_count,
        suspended_until: session.suspended_until,
        current_allowed_ips: session.current_allowed_ips.clone(),
        previous_allowed_ips: session.previous_allowed_ips.clone(),
        peer_identity: session.peer_identity.clone(),
    }
}

fn generate_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|_| GatewayError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, key.len())))
}

fn host_rule(destination: Option<&str>) -> String {
    match destination.and_then(|d| d.parse::<IpAddr>().ok()) {
        Some(IpAddr::V4(ip)) => format!("{}/32", ip),
        Some(IpAddr::V6(ip)) => format!("{}/128", ip),
        // Local-only fail-safe when no destination is known.
        None => "127.0.0.1/32".to_string(),
    }
}
