//! Blocked / blocked-by sets with an optimistic mutation lifecycle.
//!
//! [`RelationSet`] is the pure model behind the relationship store. Local
//! block/unblock calls change the visible set immediately and are tracked
//! per target until the queued remote write resolves. Remote snapshots for
//! a target with outstanding operations only move that target's *base*
//! (the last known remote value); the optimistic value wins until every
//! operation for the target has been confirmed or rolled back.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use sync_types::{BlockRelation, OperationId, UserId};

/// Resolved outcomes remembered for [`RelationSet::lifecycle`] lookups.
const OUTCOME_HISTORY: usize = 512;

/// Where an optimistic operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Visible locally, remote write outstanding.
    AppliedLocally,
    /// The remote store accepted the write.
    ConfirmedRemote,
    /// The write was rejected or abandoned and the local change undone.
    RolledBack,
}

/// One outstanding optimistic operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOp {
    /// Queue operation carrying the remote write.
    pub op: OperationId,
    /// Relation after the operation (`None` = unblocked).
    pub desired: Option<BlockRelation>,
}

/// Optimistic state of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTarget {
    /// Last known remote value.
    pub base: Option<BlockRelation>,
    /// Outstanding operations, oldest first.
    pub ops: Vec<PendingOp>,
}

/// Result of resolving an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Target of the resolved operation.
    pub target: UserId,
    /// Whether the visible state of the target changed.
    pub changed: bool,
}

/// The current actor's relation sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationSet {
    blocked_by_me: BTreeMap<UserId, BlockRelation>,
    blocking_me: BTreeMap<UserId, BlockRelation>,
    #[serde(default)]
    pending: BTreeMap<UserId, PendingTarget>,
    #[serde(skip)]
    outcomes: VecDeque<(OperationId, Lifecycle)>,
}

impl RelationSet {
    /// Empty sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the actor has blocked `user` (optimistic view).
    pub fn is_blocked(&self, user: &UserId) -> bool {
        self.blocked_by_me.contains_key(user)
    }

    /// Whether `user` has blocked the actor.
    pub fn is_blocked_by(&self, user: &UserId) -> bool {
        self.blocking_me.contains_key(user)
    }

    /// Relation record the actor holds against `user`.
    pub fn relation(&self, user: &UserId) -> Option<&BlockRelation> {
        self.blocked_by_me.get(user)
    }

    /// Users the actor has blocked.
    pub fn blocked_users(&self) -> Vec<UserId> {
        self.blocked_by_me.keys().cloned().collect()
    }

    /// Users who have blocked the actor.
    pub fn blocking_users(&self) -> Vec<UserId> {
        self.blocking_me.keys().cloned().collect()
    }

    /// Apply a local block (`Some`) or unblock (`None`) tracked by `op`.
    ///
    /// Returns true if the visible state changed.
    pub fn apply_local(
        &mut self,
        op: OperationId,
        target: &UserId,
        desired: Option<BlockRelation>,
    ) -> bool {
        let current = self.blocked_by_me.get(target).cloned();
        let entry = self.pending.entry(target.clone()).or_insert_with(|| PendingTarget {
            base: current.clone(),
            ops: Vec::new(),
        });
        entry.ops.push(PendingOp {
            op,
            desired: desired.clone(),
        });
        let changed = current.is_some() != desired.is_some();
        self.set_visible(target, desired);
        changed
    }

    /// The remote store applied `op`: its desired value becomes the base.
    pub fn confirm(&mut self, op: &OperationId) -> Option<Resolution> {
        let (target, removed) = self.take_op(op)?;
        self.remember(*op, Lifecycle::ConfirmedRemote);

        let settled = match self.pending.get_mut(&target) {
            Some(entry) => {
                entry.base = removed.desired;
                entry.ops.is_empty()
            }
            None => true,
        };
        if settled {
            self.pending.remove(&target);
        }
        // The visible value already reflects the newest desired state.
        Some(Resolution { target, changed: false })
    }

    /// Undo `op` after rejection or abandonment.
    ///
    /// The visible value becomes the newest remaining operation's desired
    /// state, or the base when none remain.
    pub fn roll_back(&mut self, op: &OperationId) -> Option<Resolution> {
        let (target, _) = self.take_op(op)?;
        self.remember(*op, Lifecycle::RolledBack);

        let entry = self.pending.get(&target)?;
        let restored = match entry.ops.last() {
            Some(newest) => newest.desired.clone(),
            None => entry.base.clone(),
        };
        if entry.ops.is_empty() {
            self.pending.remove(&target);
        }
        let changed = self.is_blocked(&target) != restored.is_some();
        self.set_visible(&target, restored);
        Some(Resolution { target, changed })
    }

    /// Lifecycle of `op`, if it is outstanding or recently resolved.
    pub fn lifecycle(&self, op: &OperationId) -> Option<Lifecycle> {
        if self.pending.values().any(|t| t.ops.iter().any(|p| &p.op == op)) {
            return Some(Lifecycle::AppliedLocally);
        }
        self.outcomes
            .iter()
            .rev()
            .find(|(id, _)| id == op)
            .map(|(_, lifecycle)| *lifecycle)
    }

    /// Whether `target` has outstanding operations.
    pub fn has_pending(&self, target: &UserId) -> bool {
        self.pending.contains_key(target)
    }

    /// Every outstanding operation id.
    pub fn pending_ops(&self) -> Vec<OperationId> {
        self.pending
            .values()
            .flat_map(|t| t.ops.iter().map(|p| p.op))
            .collect()
    }

    /// Live remote record: the actor blocks `relation.target_id`.
    ///
    /// Returns true if the visible state changed.
    pub fn reconcile_remote_block(&mut self, relation: BlockRelation) -> bool {
        let target = relation.target_id.clone();
        if let Some(entry) = self.pending.get_mut(&target) {
            entry.base = Some(relation);
            return false;
        }
        let changed = !self.is_blocked(&target);
        self.blocked_by_me.insert(target, relation);
        changed
    }

    /// Live remote record removed: the actor no longer blocks `target`.
    pub fn reconcile_remote_unblock(&mut self, target: &UserId) -> bool {
        if let Some(entry) = self.pending.get_mut(target) {
            entry.base = None;
            return false;
        }
        self.blocked_by_me.remove(target).is_some()
    }

    /// Full remote snapshot of the actor's outgoing relations.
    ///
    /// Returns the targets whose visible state changed.
    pub fn reconcile_outgoing(&mut self, remote: Vec<BlockRelation>) -> Vec<UserId> {
        let mut incoming: BTreeMap<UserId, BlockRelation> = remote
            .into_iter()
            .map(|rel| (rel.target_id.clone(), rel))
            .collect();
        let mut changed = Vec::new();

        for (target, entry) in self.pending.iter_mut() {
            entry.base = incoming.remove(target);
        }
        // `incoming` now holds only targets without outstanding operations.
        let stale: Vec<UserId> = self
            .blocked_by_me
            .keys()
            .filter(|t| !self.pending.contains_key(*t) && !incoming.contains_key(*t))
            .cloned()
            .collect();
        for target in stale {
            self.blocked_by_me.remove(&target);
            changed.push(target);
        }
        for (target, rel) in incoming {
            if self.blocked_by_me.insert(target.clone(), rel).is_none() {
                changed.push(target);
            }
        }
        changed
    }

    /// Live remote record: `relation.actor_id` blocks the actor.
    pub fn add_incoming(&mut self, relation: BlockRelation) -> bool {
        self.blocking_me.insert(relation.actor_id.clone(), relation).is_none()
    }

    /// Live remote record removed: `blocker` no longer blocks the actor.
    pub fn remove_incoming(&mut self, blocker: &UserId) -> bool {
        self.blocking_me.remove(blocker).is_some()
    }

    /// Full remote snapshot of relations targeting the actor.
    pub fn replace_incoming(&mut self, remote: Vec<BlockRelation>) -> bool {
        let next: BTreeMap<UserId, BlockRelation> = remote
            .into_iter()
            .map(|rel| (rel.actor_id.clone(), rel))
            .collect();
        let changed = next.keys().ne(self.blocking_me.keys());
        self.blocking_me = next;
        changed
    }

    /// After a restart: outstanding operations no longer in the queue were
    /// resolved before the crash and are treated as confirmed.
    ///
    /// Returns the settled operation ids.
    pub fn settle_missing(&mut self, queued: &HashSet<OperationId>) -> Vec<OperationId> {
        let missing: Vec<OperationId> = self
            .pending_ops()
            .into_iter()
            .filter(|op| !queued.contains(op))
            .collect();
        for op in &missing {
            self.confirm(op);
        }
        missing
    }

    /// Drop everything (sign-out).
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn set_visible(&mut self, target: &UserId, value: Option<BlockRelation>) {
        match value {
            Some(rel) => {
                self.blocked_by_me.insert(target.clone(), rel);
            }
            None => {
                self.blocked_by_me.remove(target);
            }
        }
    }

    fn take_op(&mut self, op: &OperationId) -> Option<(UserId, PendingOp)> {
        for (target, entry) in self.pending.iter_mut() {
            if let Some(index) = entry.ops.iter().position(|p| &p.op == op) {
                return Some((target.clone(), entry.ops.remove(index)));
            }
        }
        None
    }

    fn remember(&mut self, op: OperationId, lifecycle: Lifecycle) {
        if self.outcomes.len() == OUTCOME_HISTORY {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back((op, lifecycle));
    }
}
