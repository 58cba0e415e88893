//! Peer table: tracks known gossip endpoints and their liveness.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utilities::time::EphemeraTime;

/// How long a peer may go unheard-from before it is pruned.
pub const PRUNE_HORIZON_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("could not resolve peer address '{0}': {1}")]
    Resolve(String, std::io::Error),
    #[error("address '{0}' did not resolve to any socket address")]
    Empty(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// Canonical `host:port` identity of a UDP endpoint.
pub type PeerKey = String;

/// Resolves `host:port` to its canonical, already-resolved `host:port` form.
///
/// The spec requires peer identity to be keyed on the resolved address, not
/// the literal hostname, so that `localhost:9000` and `127.0.0.1:9000` collapse
/// to one peer.
pub fn canonical_peer_key(host: &str, port: u16) -> Result<PeerKey> {
    let addr = format!("{host}:{port}");
    let mut addrs = addr
        .to_socket_addrs()
        .map_err(|e| PeerError::Resolve(addr.clone(), e))?;
    let resolved: SocketAddr = addrs.next().ok_or_else(|| PeerError::Empty(addr.clone()))?;
    Ok(resolved.to_string())
}

/// A peer known to this node, plus when it was last heard from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub key: PeerKey,
    pub last_heard: u64,
}

/// Holds all peers currently known to this node.
///
/// `observe` is idempotent w.r.t. identity: repeated observations of the same
/// peer only ever bump its `last_heard` timestamp, never create duplicates.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerKey, u64>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Records (or refreshes) a peer as heard-from at `now`.
    pub fn observe(&mut self, key: PeerKey, now: u64) {
        self.peers
            .entry(key)
            .and_modify(|last_heard| *last_heard = now)
            .or_insert(now);
    }

    /// A consistent point-in-time view of all known peers.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers
            .iter()
            .map(|(key, last_heard)| Peer {
                key: key.clone(),
                last_heard: *last_heard,
            })
            .collect()
    }

    /// Keys of all known peers, excluding `exclude`.
    pub fn keys_excluding(&self, exclude: &[PeerKey]) -> Vec<PeerKey> {
        self.peers
            .keys()
            .filter(|key| !exclude.contains(key))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Removes peers not heard from within `horizon` seconds of `now`.
    pub fn prune(&mut self, now: u64, horizon_secs: u64) {
        let horizon_millis = horizon_secs * 1000;
        self.peers
            .retain(|_, last_heard| now.saturating_sub(*last_heard) <= horizon_millis);
    }

    /// Up to `k` peers chosen uniformly at random, excluding `exclude`.
    pub fn random_subset(&self, k: usize, exclude: &[PeerKey]) -> Vec<PeerKey> {
        let mut candidates = self.keys_excluding(exclude);
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(k);
        candidates
    }
}

/// Convenience for callers that just want "now" in the table's time base.
pub fn now_millis() -> u64 {
    EphemeraTime::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_is_idempotent_on_identity() {
        let mut table = PeerTable::new();
        table.observe("10.0.0.1:9000".to_string(), 100);
        table.observe("10.0.0.1:9000".to_string(), 200);
        assert_eq!(table.len(), 1);
        let snap = table.snapshot();
        assert_eq!(snap[0].last_heard, 200);
    }

    #[test]
    fn prune_removes_stale_peers_only() {
        let mut table = PeerTable::new();
        table.observe("a:1".to_string(), 0);
        table.observe("b:1".to_string(), 100_000);
        table.prune(100_000, PRUNE_HORIZON_SECS);
        let keys: Vec<_> = table.snapshot().into_iter().map(|p| p.key).collect();
        assert!(!keys.contains(&"a:1".to_string()));
        assert!(keys.contains(&"b:1".to_string()));
    }

    #[test]
    fn random_subset_never_returns_excluded_or_more_than_k() {
        let mut table = PeerTable::new();
        for i in 0..10 {
            table.observe(format!("peer-{i}:9000"), 0);
        }
        let excluded = vec!["peer-0:9000".to_string()];
        let subset = table.random_subset(3, &excluded);
        assert!(subset.len() <= 3);
        assert!(!subset.contains(&"peer-0:9000".to_string()));
    }

    #[test]
    fn canonical_peer_key_resolves_loopback() {
        let key = canonical_peer_key("127.0.0.1", 9000).unwrap();
        assert_eq!(key, "127.0.0.1:9000");
    }
}
