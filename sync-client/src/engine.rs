//! Per-actor session orchestration.
//!
//! [`SyncEngine`] owns the connectivity monitor for the process and one
//! session (queue, relationship store, feed cache) for the signed-in actor.
//! It wires the data flow between them:
//! - connectivity false → true: flush the queue, reload relations, run
//!   scheduled feed refreshes
//! - connectivity true → false: park the queue
//! - queue pending while reachable: flush
//! - relationship change: re-filter every cached feed
//!
//! Every connectivity change is persisted so the next cold start can pick
//! cache or remote before the first network event arrives.

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, LatencyProbe};
use crate::context::SyncContext;
use crate::error::{ClientError, Result};
use crate::feed::{FeedOptions, PaginatedFeedCache};
use crate::identity::IdentityProvider;
use crate::observe::{lock, Subscription};
use crate::queue::{AbandonedOperation, OfflineOperationQueue};
use crate::relationships::{RelationshipOptions, RelationshipStore};
use crate::remote::RemoteStore;
use crate::storage::{self, get_json, keys, set_json, KeyValueStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use sync_core::QueueState;
use sync_types::{ConnectivityState, NetworkEvent, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Services the engine runs against.
#[derive(Clone)]
pub struct EngineDeps {
    /// Durable local key-value store.
    pub store: Arc<dyn KeyValueStore>,
    /// Remote document store.
    pub remote: Arc<dyn RemoteStore>,
    /// Source of the signed-in actor.
    pub identity: Arc<dyn IdentityProvider>,
    /// Latency probe for connection quality.
    pub probe: Arc<dyn LatencyProbe>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}

impl EngineDeps {
    /// Dependencies with the local store selected by `config.storage` and
    /// the system clock.
    pub async fn from_config(
        config: &SyncConfig,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        probe: Arc<dyn LatencyProbe>,
    ) -> Result<Self> {
        Ok(Self {
            store: storage::open(&config.storage).await?,
            remote,
            identity,
            probe,
            clock: Arc::new(SystemClock),
        })
    }
}

impl std::fmt::Debug for EngineDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDeps").finish_non_exhaustive()
    }
}

/// Components of one actor's session.
struct Session {
    actor: UserId,
    queue: OfflineOperationQueue,
    relations: RelationshipStore,
    feed: PaginatedFeedCache,
    tasks: Vec<JoinHandle<()>>,
    subscriptions: Vec<Subscription>,
}

impl Session {
    fn dispose(self) {
        for task in &self.tasks {
            task.abort();
        }
        drop(self.subscriptions);
        self.feed.dispose();
        self.relations.dispose();
        self.queue.dispose();
        tracing::info!("Session for {} disposed", self.actor);
    }
}

/// Entry point of the sync layer.
///
/// Clones share the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: SyncConfig,
    ctx: SyncContext,
    identity: Arc<dyn IdentityProvider>,
    session: Mutex<Option<Session>>,
    lifecycle: tokio::sync::Mutex<()>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("actor", &self.actor())
            .field("connectivity", &self.inner.ctx.connectivity)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine. No session is active until [`init`](Self::init)
    /// or [`init_actor`](Self::init_actor).
    pub fn new(config: SyncConfig, deps: EngineDeps) -> Self {
        let connectivity =
            ConnectivityMonitor::new(&config.connectivity, deps.probe, Arc::clone(&deps.clock));
        let ctx = SyncContext {
            store: deps.store,
            remote: deps.remote,
            connectivity,
            clock: deps.clock,
        };
        Self {
            inner: Arc::new(EngineInner {
                config,
                ctx,
                identity: deps.identity,
                session: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start a session for the actor reported by the identity provider.
    ///
    /// Returns `NotInitialized` when nobody is signed in.
    pub async fn init(&self) -> Result<UserId> {
        let actor = self
            .inner
            .identity
            .current_actor_id()
            .ok_or(ClientError::NotInitialized)?;
        self.init_actor(actor.clone()).await?;
        Ok(actor)
    }

    /// Start a session for `actor`, replacing any other session.
    ///
    /// Loads the persisted queue, relations and feed index, then flushes
    /// and syncs when reachable. A session already running for `actor` is
    /// kept.
    pub async fn init_actor(&self, actor: UserId) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.start().await;

        if self.actor().as_ref() == Some(&actor) {
            return Ok(());
        }
        if let Some(previous) = lock(&self.inner.session).take() {
            previous.dispose();
        }

        let session = self.inner.open_session(actor.clone()).await?;
        *lock(&self.inner.session) = Some(session);
        tracing::info!("Session for {} started", actor);
        Ok(())
    }

    /// End the current session. Persisted state is kept.
    pub async fn dispose(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if let Some(session) = lock(&self.inner.session).take() {
            session.dispose();
        }
    }

    /// Re-read the identity provider and move the session to the actor it
    /// reports. Returns the new actor, or `None` when nobody is signed in.
    pub async fn switch_identity(&self) -> Result<Option<UserId>> {
        match self.inner.identity.current_actor_id() {
            Some(actor) => {
                self.init_actor(actor.clone()).await?;
                Ok(Some(actor))
            }
            None => {
                self.dispose().await;
                Ok(None)
            }
        }
    }

    /// End the current session and delete everything persisted for its
    /// actor.
    pub async fn sign_out(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let Some(session) = lock(&self.inner.session).take() else {
            return Err(ClientError::NotInitialized);
        };
        let actor = session.actor.clone();
        // Handles the host still holds must not keep the old actor's
        // relations visible.
        session.relations.clear();
        session.dispose();

        let store = self.inner.ctx.store.as_ref();
        let owned = store.keys_with_prefix(&keys::actor_prefix(&actor)).await?;
        store.multi_remove(&owned).await?;
        tracing::info!("Signed out {}: removed {} persisted entries", actor, owned.len());
        Ok(())
    }

    /// Feed connectivity events from the platform into the monitor.
    pub fn attach_network(&self, events: mpsc::Receiver<NetworkEvent>) {
        let task = self.inner.ctx.connectivity.attach(events);
        lock(&self.inner.tasks).push(task);
    }

    /// Actor of the active session.
    pub fn actor(&self) -> Option<UserId> {
        lock(&self.inner.session).as_ref().map(|s| s.actor.clone())
    }

    /// Connectivity monitor.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.ctx.connectivity
    }

    /// Offline operation queue of the active session.
    pub fn queue(&self) -> Result<OfflineOperationQueue> {
        self.with_session(|s| s.queue.clone())
    }

    /// Relationship store of the active session.
    pub fn relationships(&self) -> Result<RelationshipStore> {
        self.with_session(|s| s.relations.clone())
    }

    /// Feed cache of the active session.
    pub fn feed(&self) -> Result<PaginatedFeedCache> {
        self.with_session(|s| s.feed.clone())
    }

    /// Channel of operations the queue gave up on. Only the first call per
    /// session gets it.
    pub fn take_abandoned(&self) -> Result<Option<mpsc::UnboundedReceiver<AbandonedOperation>>> {
        self.with_session(|s| s.queue.take_abandoned())
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    fn with_session<T>(&self, f: impl FnOnce(&Session) -> T) -> Result<T> {
        lock(&self.inner.session)
            .as_ref()
            .map(f)
            .ok_or(ClientError::NotInitialized)
    }
}

impl EngineInner {
    /// Seed connectivity from the last run and spawn the process-wide
    /// tasks. Runs once.
    async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        match get_json::<ConnectivityState>(self.ctx.store.as_ref(), keys::CONNECTIVITY).await {
            Ok(Some(last)) => self.ctx.connectivity.seed(last),
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring unreadable connectivity state: {}", e),
        }

        let probe_loop = self.ctx.connectivity.spawn_probe_loop();
        let watcher = spawn_connectivity_task(self);
        lock(&self.tasks).extend([probe_loop, watcher]);
    }

    async fn open_session(&self, actor: UserId) -> Result<Session> {
        let queue =
            OfflineOperationQueue::new(actor.clone(), self.ctx.clone(), self.config.retry.policy());
        let restored = queue.load().await?;
        if restored > 0 {
            tracing::info!("Restored {} queued operations for {}", restored, actor);
        }

        let relations = RelationshipStore::new(
            actor.clone(),
            self.ctx.clone(),
            queue.clone(),
            RelationshipOptions {
                collection: self.config.storage.relation_collection.clone(),
                hide_blocking_me: self.config.feed.hide_blocking_me,
            },
        );
        relations.open().await?;

        let feed = PaginatedFeedCache::new(
            actor.clone(),
            self.ctx.clone(),
            relations.filter(),
            FeedOptions {
                ttl_ms: self.config.feed.ttl_ms(),
                stale_retention_ms: self.config.feed.stale_retention_ms(),
                default_page_size: self.config.feed.default_page_size,
            },
        );
        feed.open().await;
        // Only chains past the stale retention window; expired ones inside
        // it still serve offline cold starts.
        feed.purge_expired().await;

        let refilter = {
            let feed = feed.clone();
            relations.subscribe(move |_| feed.refilter())
        };
        let flusher = spawn_flush_task(queue.clone(), self.ctx.connectivity.clone());

        Ok(Session {
            actor,
            queue,
            relations,
            feed,
            tasks: vec![flusher],
            subscriptions: vec![refilter],
        })
    }

    fn current(&self) -> Option<(OfflineOperationQueue, RelationshipStore, PaginatedFeedCache)> {
        lock(&self.session)
            .as_ref()
            .map(|s| (s.queue.clone(), s.relations.clone(), s.feed.clone()))
    }

    async fn on_reconnect(&self) {
        let Some((queue, relations, feed)) = self.current() else {
            return;
        };
        tracing::info!("Reconnected: flushing queue and resyncing");
        queue.flush().await;
        if let Err(e) = relations.sync_remote().await {
            tracing::warn!("Relation resync failed: {}", e);
        }
        feed.on_reconnect().await;
    }

    async fn on_disconnect(&self) {
        if let Some((queue, _, _)) = self.current() {
            tracing::info!("Connection lost: queue parked");
            queue.on_connection_lost().await;
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        if let Some(session) = lock(&self.session).take() {
            session.dispose();
        }
    }
}

/// Persist every connectivity change and react to reachability flips.
fn spawn_connectivity_task(inner: &Arc<EngineInner>) -> JoinHandle<()> {
    let mut rx = inner.ctx.connectivity.watch();
    let weak: Weak<EngineInner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        let mut was_reachable = rx.borrow_and_update().reachable;
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            let Some(inner) = weak.upgrade() else {
                return;
            };

            if let Err(e) = set_json(inner.ctx.store.as_ref(), keys::CONNECTIVITY, &state).await {
                tracing::warn!("Failed to persist connectivity state: {}", e);
            }
            match (was_reachable, state.reachable) {
                (false, true) => inner.on_reconnect().await,
                (true, false) => inner.on_disconnect().await,
                _ => {}
            }
            was_reachable = state.reachable;
        }
    })
}

/// Flush whenever the queue has pending work and the remote is reachable.
fn spawn_flush_task(
    queue: OfflineOperationQueue,
    connectivity: ConnectivityMonitor,
) -> JoinHandle<()> {
    let mut rx = queue.watch();
    tokio::spawn(async move {
        loop {
            let state = *rx.borrow_and_update();
            if state == QueueState::Pending && connectivity.is_reachable() {
                queue.flush().await;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
}
