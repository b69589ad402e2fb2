//! Peer Control Plane
//!
//! Seam to the WireGuard-style peer controller that owns the live allowed-IP
//! lists. Pushes are best-effort: the gateway logs a failure and keeps
//! serving the decrypt path.

use async_trait::async_trait;

/// External peer/ACL controller
#[async_trait]
pub trait PeerControl: Send + Sync {
    /// Install or update a peer with the given allowed-IP list
    async fn add_peer(
        &self,
        session_id: &str,
        public_key: &str,
        allowed_ips: &[String],
    ) -> anyhow::Result<()>;
}
