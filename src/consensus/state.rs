//! Consensus State: the tree of in-flight OM rounds, flattened into a map
//! keyed by round id. Parent linkage is by `parentid` only, so garbage
//! collection is a sweep rather than any cyclic-reference bookkeeping.

use std::collections::HashMap;

use crate::peer::PeerKey;

/// One node's local view of a single OM recursion instance.
#[derive(Debug, Clone)]
pub struct RoundNode {
    pub id: String,
    /// Empty for the top-level round (the one a root CLI command started).
    pub parentid: String,
    pub om: i64,
    pub index: u8,
    /// This node's own vote at this level -- the value it received, before
    /// any lying is applied (lying only happens at emission).
    pub value_received: String,
    pub origin: PeerKey,
    pub path: Vec<PeerKey>,
    /// `None` until that child's report arrives (or a deadline default is
    /// substituted during a sweep).
    pub children: HashMap<PeerKey, Option<String>>,
    /// Wall-clock deadline (millis) after which outstanding children default.
    pub deadline: u64,
    /// Who to report to once this round resolves. `None` for the top-level
    /// round (it writes to the local database instead).
    pub reply_to: Option<PeerKey>,
    pub resolved: bool,
    pub resolved_at: Option<u64>,
    pub result: Option<String>,
}

impl RoundNode {
    /// True only for the round a CLI call originated locally: it has nobody
    /// to report a result to. A round spawned by an incoming forward always
    /// has a `reply_to`, even one whose inherited `parentid` is empty.
    pub fn is_root(&self) -> bool {
        self.reply_to.is_none()
    }

    pub fn all_children_reported(&self) -> bool {
        self.children.values().all(|v| v.is_some())
    }
}

/// The full set of rounds this node currently knows about.
#[derive(Debug, Default)]
pub struct ConsensusState {
    rounds: HashMap<String, RoundNode>,
}

impl ConsensusState {
    pub fn new() -> Self {
        Self {
            rounds: HashMap::new(),
        }
    }

    /// Registers a newly allocated round. A round id appears at most once;
    /// callers must check [`Self::find_round`] before calling this.
    pub fn add_round(&mut self, node: RoundNode) {
        self.rounds.insert(node.id.clone(), node);
    }

    pub fn find_round(&self, id: &str) -> Option<&RoundNode> {
        self.rounds.get(id)
    }

    /// Records a child's reported value. Returns `true` if this was a
    /// pending child of an unresolved round `parentid` (i.e. the report was
    /// accepted), `false` if it should be silently dropped.
    pub fn record_child(&mut self, parentid: &str, child: &PeerKey, value: String) -> bool {
        let Some(round) = self.rounds.get_mut(parentid) else {
            return false;
        };
        if round.resolved {
            return false;
        }
        match round.children.get_mut(child) {
            Some(slot @ None) => {
                *slot = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Marks a round resolved with its final value. No-op if called twice;
    /// the second call is a bug in the caller, not a protocol event, so it is
    /// simply ignored to preserve "resolves at most once".
    pub fn mark_resolved(&mut self, id: &str, result: String, now: u64) {
        if let Some(round) = self.rounds.get_mut(id) {
            if !round.resolved {
                round.resolved = true;
                round.resolved_at = Some(now);
                round.result = Some(result);
            }
        }
    }

    /// Finds unresolved rounds whose deadline has passed, substitutes the
    /// default sentinel for every child still missing a report, and returns
    /// their ids so the engine can resolve them (every child now has a
    /// value, so resolution can proceed unconditionally).
    pub fn sweep_expired(&mut self, now: u64, default_sentinel: &str) -> Vec<String> {
        let mut ready = Vec::new();
        for (id, round) in self.rounds.iter_mut() {
            if round.resolved || round.deadline >= now {
                continue;
            }
            let mut changed = false;
            for slot in round.children.values_mut() {
                if slot.is_none() {
                    *slot = Some(default_sentinel.to_string());
                    changed = true;
                }
            }
            if changed || round.all_children_reported() {
                ready.push(id.clone());
            }
        }
        ready
    }

    /// Drops rounds that resolved more than `grace_secs` ago. Unresolved
    /// rounds are never GC'd here; they are only removed once they resolve
    /// (via [`Self::sweep_expired`] eventually forcing resolution).
    pub fn gc(&mut self, now: u64, grace_secs: u64) {
        let grace_millis = grace_secs * 1000;
        self.rounds.retain(|_, round| match round.resolved_at {
            Some(resolved_at) => now.saturating_sub(resolved_at) <= grace_millis,
            None => true,
        });
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parentid: &str, children: &[&str]) -> RoundNode {
        RoundNode {
            id: id.to_string(),
            parentid: parentid.to_string(),
            om: 1,
            index: 0,
            value_received: "apple".to_string(),
            origin: "origin:1".to_string(),
            path: vec!["origin:1".to_string()],
            children: children.iter().map(|c| (c.to_string(), None)).collect(),
            deadline: 1_000,
            reply_to: if parentid.is_empty() {
                None
            } else {
                Some("forwarder:1".to_string())
            },
            resolved: false,
            resolved_at: None,
            result: None,
        }
    }

    #[test]
    fn record_child_rejects_unknown_and_duplicate_children() {
        let mut state = ConsensusState::new();
        state.add_round(node("r1", "", &["a:1", "b:1"]));

        assert!(state.record_child("r1", &"a:1".to_string(), "x".into()));
        assert!(!state.record_child("r1", &"a:1".to_string(), "y".into()));
        assert!(!state.record_child("r1", &"unknown:1".to_string(), "z".into()));
        assert!(!state.record_child("missing", &"a:1".to_string(), "z".into()));
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut state = ConsensusState::new();
        state.add_round(node("r1", "", &[]));
        state.mark_resolved("r1", "apple".into(), 10);
        state.mark_resolved("r1", "banana".into(), 20);
        let round = state.find_round("r1").unwrap();
        assert_eq!(round.result.as_deref(), Some("apple"));
        assert_eq!(round.resolved_at, Some(10));
    }

    #[test]
    fn sweep_expired_defaults_missing_children_only_past_deadline() {
        let mut state = ConsensusState::new();
        state.add_round(node("r1", "", &["a:1", "b:1"]));
        state.record_child("r1", &"a:1".to_string(), "apple".into());

        let ready = state.sweep_expired(500, "?");
        assert!(ready.is_empty(), "deadline not yet passed");

        let ready = state.sweep_expired(2_000, "?");
        assert_eq!(ready, vec!["r1".to_string()]);
        let round = state.find_round("r1").unwrap();
        assert_eq!(round.children.get("b:1").unwrap().as_deref(), Some("?"));
    }

    #[test]
    fn gc_drops_only_resolved_rounds_past_grace() {
        let mut state = ConsensusState::new();
        state.add_round(node("r1", "", &[]));
        state.add_round(node("r2", "", &[]));
        state.mark_resolved("r1", "apple".into(), 0);

        state.gc(5_000, 1);
        assert!(state.find_round("r1").is_none());
        assert!(state.find_round("r2").is_some(), "unresolved rounds survive gc");
    }
}
