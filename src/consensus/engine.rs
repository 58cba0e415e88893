//! Consensus Engine: starts, propagates, and resolves OM rounds, reporting
//! results upward (or to the local database at the top level).

use std::collections::HashMap;

use log::{debug, trace, warn};

use crate::database::{self, DatabaseError};
use crate::peer::{PeerKey, PeerTable};
use crate::utilities::id::round_id;
use crate::wire::ConsensusMessage;

use super::state::{ConsensusState, RoundNode};
use super::{apply_lying_policy, majority, round_timeout_millis, BASE_ROUND_TIMEOUT_SECS};

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error(transparent)]
    InvalidIndex(#[from] DatabaseError),
}

/// Something the orchestrator must do as a result of a consensus transition:
/// send a datagram, or commit a resolved top-level round to the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusAction {
    Send {
        to: PeerKey,
        message: ConsensusMessage,
    },
    WriteDatabase {
        index: u8,
        value: String,
    },
}

/// Drives the recursive OM protocol for one node.
pub struct ConsensusEngine {
    state: ConsensusState,
    self_key: PeerKey,
    lying_percent: u8,
    /// Configured upper bound on Byzantine peers. Retained for visibility
    /// and future tuning; the `om` formula below does not consult it -- see
    /// DESIGN.md's Open Question decision.
    fault_bound: usize,
    base_timeout_secs: u64,
}

impl ConsensusEngine {
    pub fn new(self_key: PeerKey, lying_percent: u8, fault_bound: usize) -> Self {
        Self {
            state: ConsensusState::new(),
            self_key,
            lying_percent,
            fault_bound,
            base_timeout_secs: BASE_ROUND_TIMEOUT_SECS,
        }
    }

    pub fn set_lying_percent(&mut self, percent: u8) {
        self.lying_percent = percent.min(100);
    }

    pub fn lying_percent(&self) -> u8 {
        self.lying_percent
    }

    pub fn fault_bound(&self) -> usize {
        self.fault_bound
    }

    pub fn round_count(&self) -> usize {
        self.state.len()
    }

    /// 4.D.1 Root start.
    pub fn start_root(
        &mut self,
        index: u8,
        value: String,
        peers: &PeerTable,
        now: u64,
    ) -> Result<(String, Vec<ConsensusAction>), ConsensusError> {
        database::validate_index(index)?;

        let id = round_id(&self.self_key);
        let peer_keys = peers.keys_excluding(&[]);
        let om = (peer_keys.len() as i64 - 1).max(0);

        if peer_keys.is_empty() {
            debug!("root round {id} has no peers, resolving locally");
            return Ok((id, vec![ConsensusAction::WriteDatabase { index, value }]));
        }

        let children: HashMap<PeerKey, Option<String>> =
            peer_keys.iter().cloned().map(|k| (k, None)).collect();
        let path = vec![self.self_key.clone()];

        let node = RoundNode {
            id: id.clone(),
            parentid: String::new(),
            om,
            index,
            value_received: value.clone(),
            origin: self.self_key.clone(),
            path: path.clone(),
            children,
            deadline: now + round_timeout_millis(om, self.base_timeout_secs),
            reply_to: None,
            resolved: false,
            resolved_at: None,
            result: None,
        };
        self.state.add_round(node);

        let actions = peer_keys
            .into_iter()
            .map(|peer| ConsensusAction::Send {
                to: peer,
                message: ConsensusMessage::Forward {
                    id: id.clone(),
                    // Children must learn this round's own id as their
                    // parentid, so their eventual report routes back here --
                    // not the empty parentid this node stores for itself.
                    parentid: id.clone(),
                    om,
                    index,
                    value: value.clone(),
                    origin: self.self_key.clone(),
                    path: path.clone(),
                },
            })
            .collect();

        Ok((id, actions))
    }

    /// 4.D.2 Receive forward.
    pub fn receive_forward(
        &mut self,
        id: String,
        parentid: String,
        om: i64,
        index: u8,
        value: String,
        origin: PeerKey,
        path: Vec<PeerKey>,
        sender: PeerKey,
        peers: &PeerTable,
        now: u64,
    ) -> Vec<ConsensusAction> {
        if path.contains(&self.self_key) {
            trace!("dropping forward {id}: self already in path");
            return Vec::new();
        }
        if self.state.find_round(&id).is_some() {
            trace!("dropping forward {id}: round id already known");
            return Vec::new();
        }
        if om < 0 {
            warn!("dropping forward {id}: negative om {om}");
            return Vec::new();
        }

        let mut new_path = path.clone();
        new_path.push(self.self_key.clone());

        let mut exclude = path.clone();
        exclude.push(self.self_key.clone());
        let candidates = peers.keys_excluding(&exclude);

        let mut actions = Vec::new();
        let children: HashMap<PeerKey, Option<String>> = if om == 0 || candidates.is_empty() {
            HashMap::new()
        } else {
            let child_om = om - 1;
            for peer in &candidates {
                let child_id = round_id(&self.self_key);
                actions.push(ConsensusAction::Send {
                    to: peer.clone(),
                    message: ConsensusMessage::Forward {
                        id: child_id,
                        parentid: id.clone(),
                        om: child_om,
                        index,
                        value: value.clone(),
                        origin: origin.clone(),
                        path: new_path.clone(),
                    },
                });
            }
            candidates.into_iter().map(|p| (p, None)).collect()
        };

        let node = RoundNode {
            id: id.clone(),
            parentid,
            om,
            index,
            value_received: value,
            origin,
            path: new_path,
            children,
            deadline: now + round_timeout_millis(om, self.base_timeout_secs),
            reply_to: Some(sender),
            resolved: false,
            resolved_at: None,
            result: None,
        };
        self.state.add_round(node);

        actions.extend(self.try_resolve(&id, now));
        actions
    }

    /// 4.D.3 Receive report.
    pub fn receive_report(
        &mut self,
        parentid: String,
        reporter: PeerKey,
        sender: PeerKey,
        value: String,
        now: u64,
    ) -> Vec<ConsensusAction> {
        if self.state.find_round(&parentid).is_none() {
            trace!("dropping report: no local round {parentid}");
            return Vec::new();
        }
        let child_key = if reporter.is_empty() { sender } else { reporter };
        if !self.state.record_child(&parentid, &child_key, value) {
            trace!("dropping report: {child_key} is not a pending child of {parentid}");
            return Vec::new();
        }
        self.try_resolve(&parentid, now)
    }

    /// 4.D.5 Deadlines & sweep.
    pub fn sweep(&mut self, now: u64) -> Vec<ConsensusAction> {
        let ready = self.state.sweep_expired(now, super::DEFAULT_SENTINEL);
        let mut actions = Vec::new();
        for id in ready {
            actions.extend(self.try_resolve(&id, now));
        }
        self.state.gc(now, super::GC_GRACE_SECS);
        actions
    }

    /// 4.D.4 Resolve, if every child has reported (vacuously true for a
    /// leaf round with zero children). No-op, returning no actions, if the
    /// round is unknown, already resolved, or still has pending children.
    fn try_resolve(&mut self, id: &str, now: u64) -> Vec<ConsensusAction> {
        let Some(round) = self.state.find_round(id) else {
            return Vec::new();
        };
        if round.resolved || !round.all_children_reported() {
            return Vec::new();
        }

        let mut votes: Vec<&str> = round
            .children
            .values()
            .map(|v| v.as_deref().expect("all_children_reported checked above"))
            .collect();
        votes.push(round.value_received.as_str());
        let result = majority(&votes);

        let is_root = round.is_root();
        let index = round.index;
        let reply_to = round.reply_to.clone();
        // The id this round's own parent is tracking it under -- not this
        // round's own id. See DESIGN.md's Open Question on report routing.
        let parentid = round.parentid.clone();

        self.state.mark_resolved(id, result.clone(), now);

        if is_root {
            vec![ConsensusAction::WriteDatabase {
                index,
                value: result,
            }]
        } else {
            let Some(to) = reply_to else {
                warn!("resolved non-root round {id} with no reply target, dropping report");
                return Vec::new();
            };
            let reported_value = apply_lying_policy(&result, self.lying_percent);
            vec![ConsensusAction::Send {
                to,
                message: ConsensusMessage::Report {
                    id: round_id(&self.self_key),
                    parentid,
                    reporter: self.self_key.clone(),
                    value: reported_value,
                },
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers_with(keys: &[&str]) -> PeerTable {
        let mut table = PeerTable::new();
        for k in keys {
            table.observe((*k).to_string(), 0);
        }
        table
    }

    #[test]
    fn root_with_zero_peers_resolves_immediately() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let peers = PeerTable::new();
        let (_id, actions) = engine
            .start_root(2, "apple".into(), &peers, 0)
            .unwrap();
        assert_eq!(
            actions,
            vec![ConsensusAction::WriteDatabase {
                index: 2,
                value: "apple".into()
            }]
        );
    }

    #[test]
    fn root_rejects_out_of_range_index() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let peers = PeerTable::new();
        assert!(engine.start_root(5, "foo".into(), &peers, 0).is_err());
    }

    #[test]
    fn root_with_peers_forwards_to_each_and_records_pending_children() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let peers = peers_with(&["a:1", "b:1"]);
        let (id, actions) = engine.start_root(0, "hello".into(), &peers, 0).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(engine.round_count(), 1);
        assert!(engine.state.find_round(&id).unwrap().children.contains_key("a:1"));
    }

    #[test]
    fn forward_dropped_when_self_in_path() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let peers = peers_with(&["b:1"]);
        let actions = engine.receive_forward(
            "r1".into(),
            String::new(),
            1,
            0,
            "v".into(),
            "origin:1".into(),
            vec!["self:1".into()],
            "a:1".into(),
            &peers,
            0,
        );
        assert!(actions.is_empty());
        assert_eq!(engine.round_count(), 0);
    }

    #[test]
    fn leaf_forward_reports_back_to_sender() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let peers = peers_with(&["a:1"]);
        let actions = engine.receive_forward(
            "r1".into(),
            "parent-round".into(),
            0,
            2,
            "apple".into(),
            "origin:1".into(),
            vec!["origin:1".into()],
            "a:1".into(),
            &peers,
            0,
        );
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ConsensusAction::Send { to, message } => {
                assert_eq!(to, "a:1");
                match message {
                    ConsensusMessage::Report { parentid, value, .. } => {
                        assert_eq!(parentid, "parent-round");
                        assert_eq!(value, "apple");
                    }
                    _ => panic!("expected report"),
                }
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn report_for_unknown_round_is_dropped() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let actions = engine.receive_report("missing".into(), "a:1".into(), "a:1".into(), "v".into(), 0);
        assert!(actions.is_empty());
    }

    #[test]
    fn report_after_resolution_is_dropped() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let peers = peers_with(&["a:1"]);
        let (id, _) = engine.start_root(0, "hello".into(), &peers, 0).unwrap();
        let actions = engine.receive_report(id.clone(), "a:1".into(), "a:1".into(), "hello".into(), 0);
        assert_eq!(actions.len(), 1, "root resolves and writes db");

        let late = engine.receive_report(id, "a:1".into(), "a:1".into(), "other".into(), 1);
        assert!(late.is_empty());
    }

    #[test]
    fn two_peer_root_resolves_to_majority_after_both_report() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let peers = peers_with(&["a:1", "b:1"]);
        let (id, _) = engine.start_root(0, "hello".into(), &peers, 0).unwrap();

        let mid = engine.receive_report(id.clone(), "a:1".into(), "a:1".into(), "hello".into(), 0);
        assert!(mid.is_empty(), "not all children reported yet");

        let done = engine.receive_report(id, "b:1".into(), "b:1".into(), "hello".into(), 0);
        assert_eq!(
            done,
            vec![ConsensusAction::WriteDatabase {
                index: 0,
                value: "hello".into()
            }]
        );
    }

    #[test]
    fn sweep_resolves_rounds_past_deadline_with_default_for_missing_children() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let peers = peers_with(&["a:1", "b:1"]);
        let (id, _) = engine.start_root(0, "hello".into(), &peers, 0).unwrap();
        engine.receive_report(id, "a:1".into(), "a:1".into(), "hello".into(), 0);

        let actions = engine.sweep(100_000);
        assert_eq!(actions.len(), 1, "round should resolve via default substitution");
    }

    #[test]
    fn resolved_rounds_are_garbage_collected_after_grace() {
        let mut engine = ConsensusEngine::new("self:1".into(), 0, 1);
        let peers = PeerTable::new();
        engine.start_root(0, "hello".into(), &peers, 0).unwrap();
        assert_eq!(engine.round_count(), 0, "zero-peer root never allocates a round node");

        let peers = peers_with(&["a:1"]);
        let (id, _) = engine.start_root(1, "hello".into(), &peers, 0).unwrap();
        engine.receive_report(id, "a:1".into(), "a:1".into(), "hello".into(), 0);
        assert_eq!(engine.round_count(), 1);
        engine.sweep(1_000_000);
        assert_eq!(engine.round_count(), 0);
    }
}
