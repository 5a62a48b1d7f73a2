//! Relationship store: who the actor blocks and who blocks the actor.
//!
//! `block` / `unblock` change the in-memory sets first and notify
//! listeners synchronously, so feeds re-filter without a network round
//! trip. The remote write then goes through the offline queue. Queue
//! outcomes confirm or roll back the optimistic change.
//!
//! Two live listeners (outgoing and incoming relation records) reconcile
//! the sets with the remote store. A target with an outstanding operation
//! keeps its optimistic value until that operation resolves.

use crate::context::SyncContext;
use crate::error::{ClientError, Result};
use crate::observe::{lock, Listeners, Subscription};
use crate::queue::{OfflineOperationQueue, OperationHandler};
use crate::storage::{get_json, keys, set_json};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use sync_core::{Lifecycle, RelationSet};
use sync_types::{
    BlockRelation, LiveChange, Mutation, OperationId, OperationKind, Query, QueuedOperation,
    SyncError, UserId,
};
use tokio::task::JoinHandle;

/// Page size used when loading full relation snapshots.
const SNAPSHOT_PAGE: usize = 100;

/// Decides whether content owned by a user may be shown.
pub trait ContentFilter: Send + Sync {
    /// Check whether items owned by `owner` are visible.
    fn is_visible(&self, owner: &UserId) -> bool;
}

/// Change notifications from the relationship store.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipEvent {
    /// The actor's block on `user` was added or removed.
    Blocked {
        /// The other user.
        user: UserId,
        /// Whether the actor now blocks them.
        blocked: bool,
    },
    /// `user` started or stopped blocking the actor.
    BlockedBy {
        /// The other user.
        user: UserId,
        /// Whether they now block the actor.
        blocked: bool,
    },
    /// An optimistic change was undone.
    RolledBack {
        /// Operation that failed.
        op: OperationId,
        /// Target of the operation.
        user: UserId,
        /// Why it failed.
        error: SyncError,
    },
    /// Both sets were replaced from a remote snapshot.
    Reloaded,
}

/// Options for [`RelationshipStore`].
#[derive(Debug, Clone)]
pub struct RelationshipOptions {
    /// Remote collection holding relation records.
    pub collection: String,
    /// Also hide content from users blocking the actor.
    pub hide_blocking_me: bool,
}

impl Default for RelationshipOptions {
    fn default() -> Self {
        Self {
            collection: "blocks".to_string(),
            hide_blocking_me: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Outgoing,
    Incoming,
}

/// Blocked / blocked-by sets of the current actor.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct RelationshipStore {
    inner: Arc<RelationshipInner>,
}

struct RelationshipInner {
    actor: UserId,
    options: RelationshipOptions,
    ctx: SyncContext,
    queue: OfflineOperationQueue,
    set: Mutex<RelationSet>,
    persist_lock: tokio::sync::Mutex<()>,
    listeners: Listeners<RelationshipEvent>,
    live: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for RelationshipStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipStore")
            .field("actor", &self.inner.actor)
            .finish_non_exhaustive()
    }
}

impl RelationshipStore {
    /// Create an empty store and register it as a resolution handler of
    /// `queue`.
    pub fn new(
        actor: UserId,
        ctx: SyncContext,
        queue: OfflineOperationQueue,
        options: RelationshipOptions,
    ) -> Self {
        let inner = Arc::new(RelationshipInner {
            actor,
            options,
            ctx,
            queue,
            set: Mutex::new(RelationSet::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            listeners: Listeners::new(),
            live: Mutex::new(Vec::new()),
        });
        inner.queue.register_handler(&inner);
        Self { inner }
    }

    /// Load the persisted cache, re-apply operations still in the queue,
    /// and sync with the remote store when reachable.
    ///
    /// Call after the queue has been loaded.
    pub async fn open(&self) -> Result<()> {
        let key = keys::relations(&self.inner.actor);
        let cached: RelationSet = match get_json(self.inner.ctx.store.as_ref(), &key).await {
            Ok(cached) => cached.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(
                    "Discarding unreadable relation cache for {}: {}",
                    self.inner.actor,
                    e
                );
                RelationSet::new()
            }
        };
        *lock(&self.inner.set) = cached;

        let queued = self.inner.queue.pending().await;
        let (restored, settled) = {
            let mut set = lock(&self.inner.set);
            let mut restored = 0;
            for op in &queued {
                if set.lifecycle(&op.id) == Some(Lifecycle::AppliedLocally) {
                    continue;
                }
                if let Some((target, desired)) = self.inner.desired_state(op) {
                    set.apply_local(op.id, &target, desired);
                    restored += 1;
                }
            }
            let ids: HashSet<OperationId> = queued.iter().map(|op| op.id).collect();
            (restored, set.settle_missing(&ids))
        };
        if restored > 0 || !settled.is_empty() {
            tracing::debug!(
                "Relation cache: re-applied {} queued operations, settled {}",
                restored,
                settled.len()
            );
            self.inner.persist().await;
        }

        if self.inner.ctx.connectivity.is_reachable() {
            if let Err(e) = self.sync_remote().await {
                tracing::warn!("Relation sync failed, serving cached relations: {}", e);
            }
        }
        Ok(())
    }

    /// Attach live listeners (replacing any previous ones) and reconcile
    /// with full remote snapshots of both directions.
    pub async fn sync_remote(&self) -> std::result::Result<(), SyncError> {
        self.stop_live();
        // Listen first so nothing written between snapshot and listener is
        // missed.
        for side in [Side::Outgoing, Side::Incoming] {
            let task = self.inner.spawn_live(side).await?;
            lock(&self.inner.live).push(task);
        }

        let mine = self.inner.fetch_all(&self.inner.outgoing_query()).await?;
        let theirs = self.inner.fetch_all(&self.inner.incoming_query()).await?;

        let changed = {
            let mut set = lock(&self.inner.set);
            let outgoing_changed = set.reconcile_outgoing(mine);
            let incoming_changed = set.replace_incoming(theirs);
            !outgoing_changed.is_empty() || incoming_changed
        };
        tracing::info!("Relations synced for {}", self.inner.actor);
        if changed {
            self.inner.listeners.emit(&RelationshipEvent::Reloaded);
        }
        self.inner.persist().await;
        Ok(())
    }

    /// Block `user`. Returns true if the local state changed.
    ///
    /// The change is visible before this returns; the remote write is
    /// queued durably. Fails (and undoes the change) only when the queue
    /// cannot persist the operation.
    pub async fn block(&self, user: &UserId, reason: Option<String>) -> Result<bool> {
        if user == &self.inner.actor {
            return Err(ClientError::InvalidArgument("cannot block yourself".into()));
        }
        let now = self.inner.ctx.now_ms();
        let relation = BlockRelation::new(self.inner.actor.clone(), user.clone(), reason, now);
        let doc = relation.to_document()?;
        let op = QueuedOperation::new(
            OperationKind::Block { target: user.clone() },
            Mutation::Set {
                collection: self.inner.options.collection.clone(),
                id: doc.id,
                data: doc.data,
            },
            self.inner.ctx.now_ms(),
        );
        self.mutate(op, user, Some(relation)).await
    }

    /// Unblock `user`. Returns true if the local state changed.
    pub async fn unblock(&self, user: &UserId) -> Result<bool> {
        if user == &self.inner.actor {
            return Err(ClientError::InvalidArgument("cannot unblock yourself".into()));
        }
        let op = QueuedOperation::new(
            OperationKind::Unblock { target: user.clone() },
            Mutation::Delete {
                collection: self.inner.options.collection.clone(),
                id: BlockRelation::document_id(&self.inner.actor, user),
            },
            self.inner.ctx.now_ms(),
        );
        self.mutate(op, user, None).await
    }

    async fn mutate(
        &self,
        op: QueuedOperation,
        user: &UserId,
        desired: Option<BlockRelation>,
    ) -> Result<bool> {
        let blocked = desired.is_some();
        let id = op.id;
        {
            let mut set = lock(&self.inner.set);
            if set.is_blocked(user) == blocked {
                return Ok(false);
            }
            set.apply_local(id, user, desired);
        }
        tracing::debug!("{} {} (op {})", if blocked { "Blocked" } else { "Unblocked" }, user, id);
        self.inner.listeners.emit(&RelationshipEvent::Blocked {
            user: user.clone(),
            blocked,
        });

        if let Err(error) = self.inner.queue.enqueue_operation(op).await {
            tracing::warn!("Could not queue operation {}: {}", id, error);
            self.inner.roll_back(id, error.clone());
            return Err(error.into());
        }
        self.inner.persist().await;
        Ok(true)
    }

    /// Check whether the actor blocks `user`.
    pub fn is_blocked(&self, user: &UserId) -> bool {
        lock(&self.inner.set).is_blocked(user)
    }

    /// Check whether `user` blocks the actor.
    pub fn is_blocked_by(&self, user: &UserId) -> bool {
        lock(&self.inner.set).is_blocked_by(user)
    }

    /// Users the actor blocks.
    pub fn blocked_users(&self) -> Vec<UserId> {
        lock(&self.inner.set).blocked_users()
    }

    /// Users blocking the actor.
    pub fn blocking_users(&self) -> Vec<UserId> {
        lock(&self.inner.set).blocking_users()
    }

    /// Lifecycle of a block/unblock operation.
    pub fn lifecycle(&self, op: &OperationId) -> Option<Lifecycle> {
        lock(&self.inner.set).lifecycle(op)
    }

    /// Register a listener for relationship changes.
    pub fn subscribe(
        &self,
        listener: impl Fn(&RelationshipEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    /// The filter as a shareable trait object.
    pub fn filter(&self) -> Arc<dyn ContentFilter> {
        Arc::new(self.clone())
    }

    /// Actor owning this store.
    pub fn actor(&self) -> &UserId {
        &self.inner.actor
    }

    /// Forget both sets in memory (sign-out).
    pub fn clear(&self) {
        lock(&self.inner.set).clear();
    }

    /// Detach live listeners and drop subscribers.
    pub fn dispose(&self) {
        self.stop_live();
        self.inner.listeners.clear();
    }

    fn stop_live(&self) {
        for task in lock(&self.inner.live).drain(..) {
            task.abort();
        }
    }
}

impl ContentFilter for RelationshipStore {
    fn is_visible(&self, owner: &UserId) -> bool {
        let set = lock(&self.inner.set);
        if set.is_blocked(owner) {
            return false;
        }
        !(self.inner.options.hide_blocking_me && set.is_blocked_by(owner))
    }
}

impl RelationshipInner {
    fn outgoing_query(&self) -> Query {
        Query::collection(self.options.collection.clone()).where_eq("actorId", self.actor.as_str())
    }

    fn incoming_query(&self) -> Query {
        Query::collection(self.options.collection.clone()).where_eq("targetId", self.actor.as_str())
    }

    /// Target and desired relation of a queued block/unblock.
    fn desired_state(&self, op: &QueuedOperation) -> Option<(UserId, Option<BlockRelation>)> {
        match &op.kind {
            OperationKind::Block { target } => {
                let relation = match &op.mutation {
                    Mutation::Set { data, .. } => serde_json::from_value(data.clone()).ok(),
                    _ => None,
                }
                .unwrap_or_else(|| {
                    BlockRelation::new(self.actor.clone(), target.clone(), None, op.enqueued_at)
                });
                Some((target.clone(), Some(relation)))
            }
            OperationKind::Unblock { target } => Some((target.clone(), None)),
            OperationKind::Write => None,
        }
    }

    async fn fetch_all(&self, query: &Query) -> std::result::Result<Vec<BlockRelation>, SyncError> {
        let mut relations = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.ctx.remote.fetch(query, SNAPSHOT_PAGE, cursor.as_ref()).await?;
            for doc in &page.documents {
                match BlockRelation::from_document(doc) {
                    Ok(relation) => relations.push(relation),
                    Err(e) => tracing::warn!("Skipping malformed relation {}: {}", doc.id, e),
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(relations),
            }
        }
    }

    async fn spawn_live(
        self: &Arc<Self>,
        side: Side,
    ) -> std::result::Result<JoinHandle<()>, SyncError> {
        let query = match side {
            Side::Outgoing => self.outgoing_query(),
            Side::Incoming => self.incoming_query(),
        };
        let mut feed = self.ctx.remote.watch(&query).await?;
        let weak: Weak<Self> = Arc::downgrade(self);

        Ok(tokio::spawn(async move {
            while let Some(change) = feed.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.apply_live(side, change).await;
            }
            tracing::debug!("Relation listener ({:?}) closed", side);
        }))
    }

    async fn apply_live(&self, side: Side, change: LiveChange) {
        let relation = match BlockRelation::from_document(change.document()) {
            Ok(relation) => relation,
            Err(e) => {
                tracing::warn!("Ignoring malformed relation change: {}", e);
                return;
            }
        };
        let removed = matches!(change, LiveChange::Removed(_));

        let event = {
            let mut set = lock(&self.set);
            match side {
                Side::Outgoing => {
                    let user = relation.target_id.clone();
                    let changed = if removed {
                        set.reconcile_remote_unblock(&user)
                    } else {
                        set.reconcile_remote_block(relation)
                    };
                    changed.then_some(RelationshipEvent::Blocked { user, blocked: !removed })
                }
                Side::Incoming => {
                    let user = relation.actor_id.clone();
                    let changed = if removed {
                        set.remove_incoming(&user)
                    } else {
                        set.add_incoming(relation)
                    };
                    changed.then_some(RelationshipEvent::BlockedBy { user, blocked: !removed })
                }
            }
        };

        if let Some(event) = event {
            tracing::debug!("Live relation change: {:?}", event);
            self.listeners.emit(&event);
            self.persist().await;
        }
    }

    fn roll_back(&self, op: OperationId, error: SyncError) {
        let resolution = lock(&self.set).roll_back(&op);
        let Some(resolution) = resolution else {
            return;
        };
        if resolution.changed {
            let blocked = lock(&self.set).is_blocked(&resolution.target);
            self.listeners.emit(&RelationshipEvent::Blocked {
                user: resolution.target.clone(),
                blocked,
            });
        }
        self.listeners.emit(&RelationshipEvent::RolledBack {
            op,
            user: resolution.target,
            error,
        });
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = lock(&self.set).clone();
        let key = keys::relations(&self.actor);
        if let Err(e) = set_json(self.ctx.store.as_ref(), &key, &snapshot).await {
            tracing::warn!("Failed to persist relation cache for {}: {}", self.actor, e);
        }
    }
}

#[async_trait]
impl OperationHandler for RelationshipInner {
    async fn on_applied(&self, op: &QueuedOperation) {
        if op.kind.relation_target().is_none() {
            return;
        }
        let resolved = lock(&self.set).confirm(&op.id).is_some();
        if resolved {
            tracing::debug!("Relation operation {} confirmed", op.id);
            self.persist().await;
        }
    }

    async fn on_abandoned(&self, op: &QueuedOperation, error: &SyncError) {
        if op.kind.relation_target().is_none() {
            return;
        }
        tracing::warn!("Rolling back relation operation {}: {}", op.id, error);
        self.roll_back(op.id, error.clone());
        self.persist().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ConnectivityConfig;
    use crate::connectivity::{ConnectivityMonitor, ProbeStep, ScriptedProbe};
    use crate::remote::MockRemoteStore;
    use crate::storage::{KeyValueStore, MemoryStore};
    use std::time::Duration;
    use sync_core::RetryPolicy;
    use sync_types::{Document, NetworkEvent, NetworkType};

    struct Fixture {
        ctx: SyncContext,
        store: MemoryStore,
        remote: MockRemoteStore,
        queue: OfflineOperationQueue,
        relations: RelationshipStore,
    }

    fn me() -> UserId {
        UserId::new("me")
    }

    fn context(store: &MemoryStore, remote: &MockRemoteStore, reachable: bool) -> SyncContext {
        let probe = ScriptedProbe::new(Duration::from_millis(20));
        probe.push(ProbeStep::Hang);
        let clock = ManualClock::new(10_000);
        let monitor = ConnectivityMonitor::new(
            &ConnectivityConfig::default(),
            Arc::new(probe),
            Arc::new(clock.clone()),
        );
        if reachable {
            monitor.handle_event(NetworkEvent {
                reachable: true,
                network: NetworkType::Wifi,
            });
        }
        SyncContext {
            store: Arc::new(store.clone()),
            remote: Arc::new(remote.clone()),
            connectivity: monitor,
            clock: Arc::new(clock),
        }
    }

    async fn open(store: &MemoryStore, remote: &MockRemoteStore, reachable: bool) -> Fixture {
        let ctx = context(store, remote, reachable);
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 2);
        let queue = OfflineOperationQueue::new(me(), ctx.clone(), policy);
        queue.load().await.unwrap();
        let relations = RelationshipStore::new(
            me(),
            ctx.clone(),
            queue.clone(),
            RelationshipOptions::default(),
        );
        relations.open().await.unwrap();
        Fixture {
            ctx,
            store: store.clone(),
            remote: remote.clone(),
            queue,
            relations,
        }
    }

    fn record(actor: &str, target: &str) -> Document {
        BlockRelation::new(actor.into(), target.into(), None, 1)
            .to_document()
            .unwrap()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn block_is_visible_before_remote_write() {
        let f = open(&MemoryStore::new(), &MockRemoteStore::new(), false).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = f.relations.subscribe(move |e| lock(&s).push(e.clone()));

        assert!(f.relations.block(&"u".into(), Some("spam".into())).await.unwrap());
        assert!(f.relations.is_blocked(&"u".into()));
        assert!(!f.relations.is_visible(&"u".into()));
        assert_eq!(f.queue.len().await, 1);
        assert!(f.remote.applied_writes().is_empty());
        assert_eq!(
            lock(&seen)[0],
            RelationshipEvent::Blocked {
                user: "u".into(),
                blocked: true
            }
        );
    }

    #[tokio::test]
    async fn repeated_block_and_self_block() {
        let f = open(&MemoryStore::new(), &MockRemoteStore::new(), false).await;
        assert!(f.relations.block(&"u".into(), None).await.unwrap());
        assert!(!f.relations.block(&"u".into(), None).await.unwrap());
        assert!(!f.relations.unblock(&"x".into()).await.unwrap());
        assert_eq!(f.queue.len().await, 1);

        let err = f.relations.block(&me(), None).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn flush_confirms_optimistic_block() {
        let f = open(&MemoryStore::new(), &MockRemoteStore::new(), true).await;
        f.relations.block(&"u".into(), None).await.unwrap();
        let op = f.queue.pending().await[0].id;
        assert_eq!(f.relations.lifecycle(&op), Some(Lifecycle::AppliedLocally));

        f.queue.flush().await;
        assert_eq!(f.relations.lifecycle(&op), Some(Lifecycle::ConfirmedRemote));
        assert!(f.relations.is_blocked(&"u".into()));
        assert!(f.remote.document("blocks", "me_u").is_some());
    }

    #[tokio::test]
    async fn rejection_rolls_back_and_reports_error() {
        let f = open(&MemoryStore::new(), &MockRemoteStore::new(), true).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = f.relations.subscribe(move |e| lock(&s).push(e.clone()));

        f.remote.fail_next_write(SyncError::RemoteRejected("forbidden".into()));
        f.relations.block(&"u".into(), None).await.unwrap();
        let op = f.queue.pending().await[0].id;
        f.queue.flush().await;

        assert!(!f.relations.is_blocked(&"u".into()));
        assert_eq!(f.relations.lifecycle(&op), Some(Lifecycle::RolledBack));
        let events = lock(&seen).clone();
        assert!(events.contains(&RelationshipEvent::RolledBack {
            op,
            user: "u".into(),
            error: SyncError::RemoteRejected("forbidden".into()),
        }));
        assert_eq!(
            events.iter().filter(|e| matches!(e, RelationshipEvent::Blocked { .. })).count(),
            2
        );
    }

    #[tokio::test]
    async fn queue_write_failure_undoes_block() {
        let f = open(&MemoryStore::new(), &MockRemoteStore::new(), false).await;
        f.store.fail_next_set("disk full");
        let err = f.relations.block(&"u".into(), None).await.unwrap_err();
        assert!(matches!(err, ClientError::Sync(SyncError::Serialization(_))));
        assert!(!f.relations.is_blocked(&"u".into()));
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn open_loads_remote_snapshot_both_directions() {
        let remote = MockRemoteStore::new();
        remote.insert_document("blocks", record("me", "a"));
        remote.insert_document("blocks", record("b", "me"));
        remote.insert_document("blocks", record("x", "y"));

        let f = open(&MemoryStore::new(), &remote, true).await;
        assert_eq!(f.relations.blocked_users(), vec![UserId::new("a")]);
        assert_eq!(f.relations.blocking_users(), vec![UserId::new("b")]);
        assert!(!f.relations.is_visible(&"b".into()));
        assert!(f.relations.is_visible(&"x".into()));
        assert_eq!(f.remote.watcher_count(), 2);
    }

    #[tokio::test]
    async fn live_changes_reconcile_sets() {
        let f = open(&MemoryStore::new(), &MockRemoteStore::new(), true).await;
        f.remote.insert_document("blocks", record("me", "a"));
        f.remote.insert_document("blocks", record("c", "me"));
        let relations = f.relations.clone();
        eventually(move || {
            relations.is_blocked(&"a".into()) && relations.is_blocked_by(&"c".into())
        })
        .await;

        f.remote.remove_document("blocks", "c_me");
        let relations = f.relations.clone();
        eventually(move || !relations.is_blocked_by(&"c".into())).await;
    }

    #[tokio::test]
    async fn pending_operation_wins_over_live_snapshot() {
        let remote = MockRemoteStore::new();
        remote.insert_document("blocks", record("me", "u"));
        let f = open(&MemoryStore::new(), &remote, false).await;
        f.relations.sync_remote().await.unwrap();
        assert!(f.relations.is_blocked(&"u".into()));

        f.relations.unblock(&"u".into()).await.unwrap();
        // another device re-writes the record while our unblock is queued
        f.remote.insert_document("blocks", record("me", "u"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!f.relations.is_blocked(&"u".into()));
    }

    #[tokio::test]
    async fn restart_restores_queued_and_settles_applied() {
        let store = MemoryStore::new();
        let remote = MockRemoteStore::new();
        {
            let f = open(&store, &remote, false).await;
            f.relations.block(&"u".into(), None).await.unwrap();
            f.relations.block(&"v".into(), None).await.unwrap();
            f.relations.dispose();
            f.queue.dispose();
        }

        // The queue entry for "v" was applied just before the crash.
        let mut queued: Vec<QueuedOperation> =
            serde_json::from_str(&store.raw("me/queue").unwrap()).unwrap();
        let applied = queued.pop().unwrap();
        store
            .set("me/queue", &serde_json::to_string(&queued).unwrap())
            .await
            .unwrap();

        let f = open(&store, &remote, false).await;
        assert!(f.relations.is_blocked(&"u".into()));
        assert!(f.relations.is_blocked(&"v".into()));
        assert_eq!(f.relations.lifecycle(&queued[0].id), Some(Lifecycle::AppliedLocally));
        assert_eq!(f.relations.lifecycle(&applied.id), Some(Lifecycle::ConfirmedRemote));
        assert!(f.ctx.connectivity.current().quality == sync_types::QualityTier::Offline);
    }
}
