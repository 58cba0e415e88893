//! Gossip engine: peer discovery by epidemic forwarding, plus heartbeats.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::peer::{PeerKey, PeerTable};
use crate::wire::GossipMessage;

/// Must exceed 1 for mesh healing; 3 is generous without flooding.
pub const FANOUT: usize = 3;

/// Lower bound the spec places on the dedup LRU.
pub const SEEN_CAPACITY: usize = 1024;

/// Re-broadcast a heartbeat this often.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Tracks which gossip ids have already been seen, and decides fanout.
pub struct GossipEngine {
    seen: LruCache<String, ()>,
    fanout: usize,
}

impl GossipEngine {
    pub fn new(fanout: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity must be nonzero");
        Self {
            seen: LruCache::new(capacity),
            fanout,
        }
    }

    /// Handles an inbound gossip message from `sender`.
    ///
    /// Returns the peers this message should be forwarded to (with `sender`
    /// pushed onto `path` by the caller before re-sending), or `None` if the
    /// message id was already seen and must be dropped.
    pub fn on_receive(&mut self, msg: &GossipMessage, sender: &PeerKey, peers: &PeerTable) -> Option<Vec<PeerKey>> {
        if self.seen.contains(&msg.id) {
            return None;
        }
        self.seen.put(msg.id.clone(), ());

        let mut exclude = msg.path.clone();
        exclude.push(sender.clone());
        Some(peers.random_subset(self.fanout, &exclude))
    }

    /// Builds a fresh heartbeat announcing this node, with an empty path.
    pub fn heartbeat(&mut self, self_host: &str, self_port: u16) -> GossipMessage {
        let msg = GossipMessage {
            id: crate::utilities::id::random_hex128(),
            host: self_host.to_string(),
            port: self_port,
            path: Vec::new(),
        };
        // A node never needs to re-forward its own heartbeat to itself.
        self.seen.put(msg.id.clone(), ());
        msg
    }
}

impl Default for GossipEngine {
    fn default() -> Self {
        Self::new(FANOUT, SEEN_CAPACITY)
    }
}
