//! Offline operation queue.
//!
//! Durable FIFO of remote mutations. Operations are written to the local
//! store before `enqueue` returns and removed only after the remote store
//! applied them or they were abandoned.
//!
//! # Architecture
//!
//! The flush lifecycle is driven by the pure [`QueueState`] machine from
//! sync-core; this module interprets its actions:
//!
//! ```text
//! enqueue ─► OperationQueue (tokio Mutex) ─► KeyValueStore
//!                │
//! flush ─► QueueState ─► ProcessNext ─► RemoteStore::write(key, mutation)
//!                     └► StartRetryTimer ─► sleep ─► RetryTimerFired
//! ```
//!
//! Resolution handlers (the relationship store) are told about every
//! applied or abandoned operation. Abandoned operations are also sent on a
//! channel for the UI layer.

use crate::context::SyncContext;
use crate::observe::{lock, Listeners, Subscription};
use crate::storage::{get_json, keys, set_json};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use sync_core::{Disposition, FlushAction, FlushEvent, OperationQueue, QueueState, RetryPolicy};
use sync_types::{Mutation, OperationId, OperationKind, QueuedOperation, SyncError, UserId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// An operation that was removed without being applied.
#[derive(Debug, Clone, PartialEq)]
pub struct AbandonedOperation {
    /// The operation, with its final attempt count.
    pub operation: QueuedOperation,
    /// The failure that ended it.
    pub error: SyncError,
}

/// Events published to queue listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// An operation was durably queued.
    Enqueued(OperationId),
    /// The remote store confirmed an operation.
    Applied {
        /// Operation id.
        id: OperationId,
        /// False when the remote side had already applied this key.
        fresh: bool,
    },
    /// An attempt failed transiently; the operation stays queued.
    Retrying {
        /// Operation id.
        id: OperationId,
        /// Failed attempts so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// An operation was removed without being applied.
    Abandoned(AbandonedOperation),
    /// The flush state changed.
    State(QueueState),
}

/// Receives the outcome of every queued operation.
///
/// Handlers are held weakly; dropping the handler unregisters it.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// The remote store applied `op`.
    async fn on_applied(&self, op: &QueuedOperation);

    /// `op` was abandoned after `error`.
    async fn on_abandoned(&self, op: &QueuedOperation, error: &SyncError);
}

/// Durable FIFO of pending remote mutations for one actor.
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct OfflineOperationQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    actor: UserId,
    core: tokio::sync::Mutex<OperationQueue>,
    flush_lock: tokio::sync::Mutex<()>,
    state: Mutex<QueueState>,
    state_tx: watch::Sender<QueueState>,
    ctx: SyncContext,
    policy: RetryPolicy,
    handlers: Mutex<Vec<Weak<dyn OperationHandler>>>,
    listeners: Listeners<QueueEvent>,
    abandoned_tx: mpsc::UnboundedSender<AbandonedOperation>,
    abandoned_rx: Mutex<Option<mpsc::UnboundedReceiver<AbandonedOperation>>>,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for OfflineOperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineOperationQueue")
            .field("actor", &self.inner.actor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl OfflineOperationQueue {
    /// Create an empty queue for `actor`. Call [`load`](Self::load) to
    /// restore operations persisted by a previous run.
    pub fn new(actor: UserId, ctx: SyncContext, policy: RetryPolicy) -> Self {
        let (state_tx, _) = watch::channel(QueueState::new());
        let (abandoned_tx, abandoned_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                actor,
                core: tokio::sync::Mutex::new(OperationQueue::new()),
                flush_lock: tokio::sync::Mutex::new(()),
                state: Mutex::new(QueueState::new()),
                state_tx,
                ctx,
                policy,
                handlers: Mutex::new(Vec::new()),
                listeners: Listeners::new(),
                abandoned_tx,
                abandoned_rx: Mutex::new(Some(abandoned_rx)),
                retry_timer: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Restore the persisted queue (order and attempt counts retained).
    ///
    /// Returns the number of restored operations.
    pub async fn load(&self) -> Result<usize, SyncError> {
        let key = keys::queue(&self.inner.actor);
        let ops: Vec<QueuedOperation> = get_json(self.inner.ctx.store.as_ref(), &key)
            .await?
            .unwrap_or_default();
        let count = ops.len();

        *self.inner.core.lock().await = OperationQueue::restore(ops);
        if count > 0 {
            tracing::info!("Restored {} queued operations for {}", count, self.inner.actor);
            self.inner.transition(FlushEvent::Enqueued);
        }
        Ok(count)
    }

    /// Queue a mutation. Durable before return.
    ///
    /// Fails with `Serialization` (and queues nothing) when the local store
    /// cannot be written.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        mutation: Mutation,
    ) -> Result<OperationId, SyncError> {
        let op = QueuedOperation::new(kind, mutation, self.inner.ctx.now_ms());
        self.enqueue_operation(op).await
    }

    /// Queue a prepared operation (caller-chosen idempotency key).
    pub async fn enqueue_operation(&self, op: QueuedOperation) -> Result<OperationId, SyncError> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(SyncError::Serialization(format!(
                "queue for {} is disposed",
                self.inner.actor
            )));
        }
        let id = op.id;
        {
            let mut core = self.inner.core.lock().await;
            let mut next = core.snapshot();
            next.push(op.clone());
            set_json(self.inner.ctx.store.as_ref(), &keys::queue(&self.inner.actor), &next).await?;
            core.enqueue(op);
        }
        tracing::debug!("Enqueued operation {}", id);

        self.inner.transition(FlushEvent::Enqueued);
        self.inner.listeners.emit(&QueueEvent::Enqueued(id));
        Ok(id)
    }

    /// Apply queued operations front to back while reachable.
    ///
    /// Returns false if another flush was already running (this call was a
    /// no-op).
    pub async fn flush(&self) -> bool {
        self.inner.flush().await
    }

    /// Connectivity dropped: park the queue until the next flush.
    pub async fn on_connection_lost(&self) {
        let queued = self.inner.core.lock().await.len();
        self.inner.transition(FlushEvent::ConnectionLost { queued });
    }

    /// Queued operations, front first.
    pub async fn pending(&self) -> Vec<QueuedOperation> {
        self.inner.core.lock().await.snapshot()
    }

    /// Number of queued operations.
    pub async fn len(&self) -> usize {
        self.inner.core.lock().await.len()
    }

    /// Check whether nothing is queued.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current flush state.
    pub fn state(&self) -> QueueState {
        *lock(&self.inner.state)
    }

    /// Receiver that observes every flush state change.
    pub fn watch(&self) -> watch::Receiver<QueueState> {
        self.inner.state_tx.subscribe()
    }

    /// Register a listener for queue events.
    pub fn subscribe(
        &self,
        listener: impl Fn(&QueueEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    /// Register a resolution handler. The queue only keeps a weak
    /// reference.
    pub fn register_handler<H: OperationHandler + 'static>(&self, handler: &Arc<H>) {
        let weak = Arc::downgrade(handler) as Weak<dyn OperationHandler>;
        lock(&self.inner.handlers).push(weak);
    }

    /// Take the abandoned-operation channel. Only the first call gets it.
    pub fn take_abandoned(&self) -> Option<mpsc::UnboundedReceiver<AbandonedOperation>> {
        lock(&self.inner.abandoned_rx).take()
    }

    /// Actor owning this queue.
    pub fn actor(&self) -> &UserId {
        &self.inner.actor
    }

    /// Drop every queued operation, in memory and on disk (sign-out).
    pub async fn clear(&self) -> Result<Vec<QueuedOperation>, SyncError> {
        let dropped = {
            let mut core = self.inner.core.lock().await;
            self.inner.ctx.store.remove(&keys::queue(&self.inner.actor)).await?;
            core.clear()
        };
        self.inner.transition(FlushEvent::Cleared);
        if !dropped.is_empty() {
            tracing::info!("Cleared {} queued operations for {}", dropped.len(), self.inner.actor);
        }
        Ok(dropped)
    }

    /// Stop the retry timer and refuse further work. Persisted operations
    /// stay on disk for the next session.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel_retry_timer();
        self.inner.listeners.clear();
        lock(&self.inner.handlers).clear();
        tracing::debug!("Queue for {} disposed", self.inner.actor);
    }
}

impl QueueInner {
    fn transition(&self, event: FlushEvent) -> Vec<FlushAction> {
        let (previous, next, actions) = {
            let mut state = lock(&self.state);
            let previous = *state;
            let (next, actions) = previous.on_event(event);
            *state = next;
            (previous, next, actions)
        };

        if actions.contains(&FlushAction::CancelRetryTimer) {
            self.cancel_retry_timer();
        }
        if next != previous {
            tracing::debug!("Queue state: {:?} -> {:?}", previous, next);
            self.state_tx.send_replace(next);
            self.listeners.emit(&QueueEvent::State(next));
        }
        actions
    }

    async fn flush(self: &Arc<Self>) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(_guard) = self.flush_lock.try_lock() else {
            tracing::debug!("Flush already running");
            return false;
        };

        loop {
            let queued = self.core.lock().await.len();
            let reachable = self.ctx.connectivity.is_reachable();
            let actions = self.transition(FlushEvent::FlushRequested { reachable, queued });
            if actions.contains(&FlushAction::ProcessNext) {
                self.drain().await;
            }

            // Connectivity may have bounced while draining (a reconnect
            // flush during that window was a no-op), and operations can
            // land while a handler runs.
            let queued = self.core.lock().await.len();
            let again = match *lock(&self.state) {
                QueueState::Pending => true,
                QueueState::Idle => queued > 0,
                QueueState::Flushing | QueueState::Backoff { .. } => false,
            };
            let reachable = self.ctx.connectivity.is_reachable();
            if !(again && reachable) || self.disposed.load(Ordering::SeqCst) {
                break;
            }
        }
        true
    }

    async fn on_retry_timer(self: &Arc<Self>) {
        let _guard = self.flush_lock.lock().await;
        let reachable = self.ctx.connectivity.is_reachable();
        let actions = self.transition(FlushEvent::RetryTimerFired { reachable });
        if actions.contains(&FlushAction::ProcessNext) {
            self.drain().await;
        }
    }

    /// Process operations while the state machine asks for the next one.
    /// Caller holds `flush_lock`.
    async fn drain(self: &Arc<Self>) {
        loop {
            if self.disposed.load(Ordering::SeqCst) {
                return;
            }
            let Some(op) = self.core.lock().await.begin() else {
                self.transition(FlushEvent::OperationApplied { remaining: 0 });
                return;
            };

            let result = self.ctx.remote.write(op.id, &op.mutation).await;
            let actions = match result {
                Ok(ack) => self.complete(op, ack.applied).await,
                Err(error) => self.fail(op, error).await,
            };

            for action in &actions {
                if let FlushAction::StartRetryTimer { delay } = action {
                    self.start_retry_timer(*delay);
                }
            }
            if !actions.contains(&FlushAction::ProcessNext) {
                return;
            }
        }
    }

    async fn complete(self: &Arc<Self>, op: QueuedOperation, fresh: bool) -> Vec<FlushAction> {
        {
            let mut core = self.core.lock().await;
            core.ack(&op.id);
            self.persist(&core).await;
        }
        if fresh {
            tracing::debug!("Applied operation {}", op.id);
        } else {
            tracing::debug!("Operation {} was already applied remotely", op.id);
        }

        for handler in self.live_handlers() {
            handler.on_applied(&op).await;
        }
        self.listeners.emit(&QueueEvent::Applied { id: op.id, fresh });
        self.settle(|remaining| FlushEvent::OperationApplied { remaining }).await
    }

    async fn fail(self: &Arc<Self>, op: QueuedOperation, error: SyncError) -> Vec<FlushAction> {
        let disposition = {
            let mut core = self.core.lock().await;
            let disposition = core.fail(&op.id, &error, &self.policy);
            self.persist(&core).await;
            disposition
        };

        match disposition {
            Some(Disposition::Retry { attempt, delay }) => {
                tracing::warn!(
                    "Operation {} failed (attempt {}), retrying in {}ms: {}",
                    op.id,
                    attempt,
                    delay.as_millis(),
                    error
                );
                self.listeners.emit(&QueueEvent::Retrying {
                    id: op.id,
                    attempt,
                    delay,
                });
                self.transition(FlushEvent::OperationRetry { attempt, delay })
            }
            Some(Disposition::Abandoned(abandoned)) => {
                tracing::error!(
                    "Abandoned operation {} after {} attempts: {}",
                    abandoned.id,
                    abandoned.attempts,
                    error
                );
                for handler in self.live_handlers() {
                    handler.on_abandoned(&abandoned, &error).await;
                }
                let report = AbandonedOperation {
                    operation: abandoned,
                    error,
                };
                let _ = self.abandoned_tx.send(report.clone());
                self.listeners.emit(&QueueEvent::Abandoned(report));
                self.settle(|remaining| FlushEvent::OperationAbandoned { remaining }).await
            }
            // cleared while the write was in flight
            None => self.settle(|remaining| FlushEvent::OperationApplied { remaining }).await,
        }
    }

    /// Report an operation's outcome with the queue length read under the
    /// core lock. An enqueue either lands before the count (and is drained
    /// next) or after the transition (and moves the state to Pending).
    async fn settle(&self, event: impl FnOnce(usize) -> FlushEvent) -> Vec<FlushAction> {
        let core = self.core.lock().await;
        let actions = self.transition(event(core.len()));
        drop(core);
        actions
    }

    async fn persist(&self, core: &OperationQueue) {
        let key = keys::queue(&self.actor);
        // A lost write here only means an applied operation is replayed
        // after a restart; its idempotency key makes that harmless.
        if let Err(e) = set_json(self.ctx.store.as_ref(), &key, &core.snapshot()).await {
            tracing::warn!("Failed to persist queue for {}: {}", self.actor, e);
        }
    }

    fn live_handlers(&self) -> Vec<Arc<dyn OperationHandler>> {
        let mut handlers = lock(&self.handlers);
        handlers.retain(|h| h.strong_count() > 0);
        handlers.iter().filter_map(Weak::upgrade).collect()
    }

    fn start_retry_timer(self: &Arc<Self>, delay: Duration) {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_retry_timer().await;
        });
        if let Some(previous) = lock(&self.retry_timer).replace(task) {
            previous.abort();
        }
    }

    fn cancel_retry_timer(&self) {
        if let Some(task) = lock(&self.retry_timer).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ConnectivityConfig;
    use crate::connectivity::{ConnectivityMonitor, ProbeStep, ScriptedProbe};
    use crate::remote::MockRemoteStore;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use sync_types::{NetworkEvent, NetworkType};

    struct Fixture {
        queue: OfflineOperationQueue,
        store: MemoryStore,
        remote: MockRemoteStore,
        ctx: SyncContext,
    }

    fn fixture(reachable: bool) -> Fixture {
        let store = MemoryStore::new();
        let remote = MockRemoteStore::new();
        let clock = ManualClock::new(1_000);
        let probe = ScriptedProbe::new(Duration::from_millis(20));
        probe.push(ProbeStep::Hang);
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
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(4), 3);
        let ctx = SyncContext {
            store: Arc::new(store.clone()),
            remote: Arc::new(remote.clone()),
            connectivity: monitor.clone(),
            clock: Arc::new(clock),
        };
        let queue = OfflineOperationQueue::new(UserId::new("alice"), ctx.clone(), policy);
        Fixture {
            queue,
            store,
            remote,
            ctx,
        }
    }

    fn set_post(id: &str) -> Mutation {
        Mutation::Set {
            collection: "posts".into(),
            id: id.into(),
            data: json!({"ownerId": "alice", "timestamp": 1}),
        }
    }

    async fn wait_for_state(queue: &OfflineOperationQueue, wanted: QueueState) {
        let mut rx = queue.watch();
        tokio::time::timeout(Duration::from_secs(5), async {
            while *rx.borrow_and_update() != wanted {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn enqueue_is_durable_before_return() {
        let f = fixture(false);
        let id = f.queue.enqueue(OperationKind::Write, set_post("p1")).await.unwrap();

        let persisted: Vec<QueuedOperation> =
            serde_json::from_str(&f.store.raw("alice/queue").unwrap()).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, id);
        assert_eq!(f.queue.state(), QueueState::Pending);
    }

    #[tokio::test]
    async fn failed_durable_write_queues_nothing() {
        let f = fixture(false);
        f.store.fail_next_set("disk full");
        let err = f
            .queue
            .enqueue(OperationKind::Write, set_post("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Serialization(_)));
        assert!(f.queue.is_empty().await);
        assert_eq!(f.queue.state(), QueueState::Idle);
    }

    #[tokio::test]
    async fn flush_applies_in_fifo_order() {
        let f = fixture(true);
        let a = f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();
        let b = f.queue.enqueue(OperationKind::Write, set_post("b")).await.unwrap();
        let c = f.queue.enqueue(OperationKind::Write, set_post("c")).await.unwrap();

        assert!(f.queue.flush().await);
        let order: Vec<OperationId> =
            f.remote.applied_writes().into_iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec![a, b, c]);
        assert!(f.queue.is_empty().await);
        assert_eq!(f.queue.state(), QueueState::Idle);
        assert_eq!(f.store.raw("alice/queue").as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn flush_while_offline_keeps_pending() {
        let f = fixture(false);
        f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();
        f.queue.flush().await;
        assert_eq!(f.queue.state(), QueueState::Pending);
        assert_eq!(f.remote.write_attempts(), 0);
    }

    #[tokio::test]
    async fn transient_failure_backs_off_then_succeeds() {
        let f = fixture(true);
        f.remote.fail_next_write(SyncError::NetworkUnavailable("blip".into()));
        let retries = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&retries);
        let _sub = f.queue.subscribe(move |event| {
            if matches!(event, QueueEvent::Retrying { attempt: 1, .. }) {
                r.fetch_add(1, Ordering::SeqCst);
            }
        });

        f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();
        f.queue.flush().await;
        wait_for_state(&f.queue, QueueState::Idle).await;

        assert_eq!(retries.load(Ordering::SeqCst), 1);
        assert_eq!(f.remote.applied_writes().len(), 1);
        assert_eq!(f.remote.write_attempts(), 2);
    }

    #[tokio::test]
    async fn permanent_failure_abandons_immediately() {
        let f = fixture(true);
        let mut abandoned = f.queue.take_abandoned().unwrap();
        assert!(f.queue.take_abandoned().is_none());

        f.remote.fail_next_write(SyncError::RemoteRejected("invalid".into()));
        let a = f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();
        let b = f.queue.enqueue(OperationKind::Write, set_post("b")).await.unwrap();
        f.queue.flush().await;

        let report = abandoned.recv().await.unwrap();
        assert_eq!(report.operation.id, a);
        assert_eq!(report.operation.attempts, 1);
        assert!(matches!(report.error, SyncError::RemoteRejected(_)));
        assert_eq!(f.remote.applied_writes()[0].0, b);
    }

    #[tokio::test]
    async fn transient_failures_abandon_at_ceiling() {
        let f = fixture(true);
        let mut abandoned = f.queue.take_abandoned().unwrap();
        f.remote.fail_writes(Some(SyncError::RateLimited { retry_after: None }));

        f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();
        f.queue.flush().await;

        let report = tokio::time::timeout(Duration::from_secs(5), abandoned.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.operation.attempts, 3);
        assert_eq!(f.remote.write_attempts(), 3);
        wait_for_state(&f.queue, QueueState::Idle).await;
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn restored_queue_keeps_order_and_attempts() {
        let f = fixture(false);
        let mut first = QueuedOperation::new(OperationKind::Write, set_post("a"), 5);
        first.attempts = 2;
        let a = f.queue.enqueue_operation(first).await.unwrap();
        let b = f.queue.enqueue(OperationKind::Write, set_post("b")).await.unwrap();

        let restarted =
            OfflineOperationQueue::new(UserId::new("alice"), f.ctx.clone(), RetryPolicy::default());
        assert_eq!(restarted.load().await.unwrap(), 2);
        let pending = restarted.pending().await;
        let ids: Vec<OperationId> = pending.iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(pending[0].attempts, 2);
        assert_eq!(restarted.state(), QueueState::Pending);
    }

    #[tokio::test]
    async fn concurrent_flush_is_a_no_op() {
        let f = fixture(true);
        f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();

        let hold = f.remote.hold_next_write();
        let queue = f.queue.clone();
        let first = tokio::spawn(async move { queue.flush().await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.queue.state(), QueueState::Flushing);
        assert!(!f.queue.flush().await);

        hold.release();
        assert!(first.await.unwrap());
        assert_eq!(f.remote.applied_writes().len(), 1);
        assert_eq!(f.remote.write_attempts(), 1);
    }

    struct Recorder {
        applied: Mutex<Vec<OperationId>>,
        abandoned: Mutex<Vec<OperationId>>,
    }

    #[async_trait]
    impl OperationHandler for Recorder {
        async fn on_applied(&self, op: &QueuedOperation) {
            lock(&self.applied).push(op.id);
        }

        async fn on_abandoned(&self, op: &QueuedOperation, _error: &SyncError) {
            lock(&self.abandoned).push(op.id);
        }
    }

    #[tokio::test]
    async fn handlers_see_outcomes_and_are_weak() {
        let f = fixture(true);
        let recorder = Arc::new(Recorder {
            applied: Mutex::new(Vec::new()),
            abandoned: Mutex::new(Vec::new()),
        });
        f.queue.register_handler(&recorder);

        f.remote.fail_next_write(SyncError::RemoteRejected("no".into()));
        let a = f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();
        let b = f.queue.enqueue(OperationKind::Write, set_post("b")).await.unwrap();
        f.queue.flush().await;

        assert_eq!(*lock(&recorder.abandoned), vec![a]);
        assert_eq!(*lock(&recorder.applied), vec![b]);

        drop(recorder);
        f.queue.enqueue(OperationKind::Write, set_post("c")).await.unwrap();
        f.queue.flush().await;
        assert!(f.queue.is_empty().await);
    }

    /// Queues one follow-up write the first time it hears an outcome.
    struct FollowUp {
        queue: OfflineOperationQueue,
        sent: AtomicBool,
    }

    impl FollowUp {
        async fn send_once(&self) {
            if !self.sent.swap(true, Ordering::SeqCst) {
                self.queue
                    .enqueue(OperationKind::Write, set_post("follow-up"))
                    .await
                    .unwrap();
            }
        }
    }

    #[async_trait]
    impl OperationHandler for FollowUp {
        async fn on_applied(&self, _op: &QueuedOperation) {
            self.send_once().await;
        }

        async fn on_abandoned(&self, _op: &QueuedOperation, _error: &SyncError) {
            self.send_once().await;
        }
    }

    #[tokio::test]
    async fn write_queued_by_applied_handler_is_drained() {
        let f = fixture(true);
        let follow_up = Arc::new(FollowUp {
            queue: f.queue.clone(),
            sent: AtomicBool::new(false),
        });
        f.queue.register_handler(&follow_up);

        f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();
        assert!(f.queue.flush().await);

        assert!(f.queue.is_empty().await);
        assert_eq!(f.queue.state(), QueueState::Idle);
        assert_eq!(f.remote.applied_writes().len(), 2);
    }

    #[tokio::test]
    async fn write_queued_by_abandon_handler_is_drained() {
        let f = fixture(true);
        let follow_up = Arc::new(FollowUp {
            queue: f.queue.clone(),
            sent: AtomicBool::new(false),
        });
        f.queue.register_handler(&follow_up);

        f.remote.fail_next_write(SyncError::RemoteRejected("invalid".into()));
        f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();
        assert!(f.queue.flush().await);

        assert!(f.queue.is_empty().await);
        assert_eq!(f.queue.state(), QueueState::Idle);
        assert_eq!(f.remote.applied_writes().len(), 1);
    }

    #[tokio::test]
    async fn clear_and_dispose() {
        let f = fixture(false);
        f.queue.enqueue(OperationKind::Write, set_post("a")).await.unwrap();
        let dropped = f.queue.clear().await.unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(f.queue.state(), QueueState::Idle);
        assert!(f.store.raw("alice/queue").is_none());

        f.queue.dispose();
        assert!(f.queue.enqueue(OperationKind::Write, set_post("b")).await.is_err());
        assert!(!f.queue.flush().await);
    }
}
