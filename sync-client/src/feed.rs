//! Paginated feed cache.
//!
//! One [`PageChain`] per query shape merges cursor pagination with live
//! push updates. Every item passes the relationship filter before it is
//! exposed; filtered items stay in the chain's dedup index so they are
//! never resurrected by a later page or live insert.
//!
//! Cache policy on `load()`:
//!
//! | cache | reachable | result |
//! |---|---|---|
//! | unexpired | any | cached chain, not stale |
//! | expired | yes | remote first page |
//! | expired | no | cached chain, stale; one refresh on reconnect |
//! | none | yes | remote first page |
//! | none | no | empty, `NetworkUnavailable` |

use crate::context::SyncContext;
use crate::observe::{lock, Listeners, Subscription};
use crate::relationships::ContentFilter;
use crate::storage::{get_json, keys, set_json};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use sync_core::{CachedPage, ChainError, LiveOutcome, PageChain};
use sync_types::{Document, Item, ItemId, LiveChange, PageCursor, Query, SyncError, UserId};
use tokio::task::AbortHandle;

/// Result of a feed call.
///
/// Remote failures are reported in `error`; items already visible are
/// never discarded because of one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedPage {
    /// `load` / `refresh`: the whole visible chain. `load_more`: the newly
    /// visible items.
    pub items: Vec<Item>,
    /// Cursor for the next page.
    pub cursor: Option<PageCursor>,
    /// Whether more pages are available.
    pub has_more: bool,
    /// Served from a cache past its TTL.
    pub stale: bool,
    /// Failure of this call, if any.
    pub error: Option<SyncError>,
}

/// Change notification for one cached query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The visible chain of the query changed.
    Changed {
        /// Query cache key.
        key: String,
    },
}

/// Options for [`PaginatedFeedCache`].
#[derive(Debug, Clone, Copy)]
pub struct FeedOptions {
    /// Cache TTL in milliseconds.
    pub ttl_ms: u64,
    /// How long an expired chain is kept for offline cold starts, counted
    /// from its expiry. Only [`PaginatedFeedCache::purge_expired`] honours
    /// it; a successful refresh replaces the chain regardless.
    pub stale_retention_ms: u64,
    /// Page size used when a caller passes 0.
    pub default_page_size: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            ttl_ms: 24 * 60 * 60 * 1000,
            stale_retention_ms: 7 * 24 * 60 * 60 * 1000,
            default_page_size: 20,
        }
    }
}

struct ChainSlot {
    query: Query,
    chain: PageChain,
    page_size: usize,
    loading_more: bool,
    refreshing: bool,
    refresh_seq: u64,
    refresh_scheduled: bool,
    buffered: Vec<LiveChange>,
}

impl ChainSlot {
    fn new(query: &Query, page_size: usize) -> Self {
        Self {
            query: query.clone(),
            chain: PageChain::new(query.cache_key(), query.direction()),
            page_size,
            loading_more: false,
            refreshing: false,
            refresh_seq: 0,
            refresh_scheduled: false,
            buffered: Vec::new(),
        }
    }
}

/// Cursor-paginated feeds with a local TTL cache and live updates.
///
/// Clones share the same cache.
#[derive(Clone)]
pub struct PaginatedFeedCache {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    actor: UserId,
    ctx: SyncContext,
    filter: Arc<dyn ContentFilter>,
    options: FeedOptions,
    chains: Mutex<HashMap<String, ChainSlot>>,
    index: Mutex<BTreeSet<String>>,
    persist_lock: tokio::sync::Mutex<()>,
    listeners: Listeners<FeedEvent>,
    live: Mutex<Vec<(Arc<AtomicBool>, AbortHandle)>>,
}

impl std::fmt::Debug for PaginatedFeedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedFeedCache")
            .field("actor", &self.inner.actor)
            .field("chains", &lock(&self.inner.chains).len())
            .finish_non_exhaustive()
    }
}

/// Handle of a live listener attached by
/// [`PaginatedFeedCache::subscribe_live`].
///
/// No live event mutates the cache after `unsubscribe()` returns or the
/// handle is dropped.
#[must_use = "dropping a LiveSubscription detaches the listener"]
pub struct LiveSubscription {
    active: Arc<AtomicBool>,
    task: AbortHandle,
    feed: Weak<FeedInner>,
}

impl LiveSubscription {
    /// Detach the listener.
    pub fn unsubscribe(self) {}

    /// Whether the listener is still attached.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        match self.feed.upgrade() {
            Some(feed) => {
                // flip under the chain lock so an event being applied
                // finishes before we return
                let _chains = lock(&feed.chains);
                self.active.store(false, Ordering::SeqCst);
            }
            None => self.active.store(false, Ordering::SeqCst),
        }
        self.task.abort();
    }
}

impl std::fmt::Debug for LiveSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("active", &self.is_active())
            .finish()
    }
}

impl PaginatedFeedCache {
    /// Create a cache for `actor` that shows only what `filter` allows.
    pub fn new(
        actor: UserId,
        ctx: SyncContext,
        filter: Arc<dyn ContentFilter>,
        options: FeedOptions,
    ) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                actor,
                ctx,
                filter,
                options,
                chains: Mutex::new(HashMap::new()),
                index: Mutex::new(BTreeSet::new()),
                persist_lock: tokio::sync::Mutex::new(()),
                listeners: Listeners::new(),
                live: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Read the index of persisted chains.
    pub async fn open(&self) {
        let key = keys::feed_index(&self.inner.actor);
        match get_json::<BTreeSet<String>>(self.inner.ctx.store.as_ref(), &key).await {
            Ok(index) => *lock(&self.inner.index) = index.unwrap_or_default(),
            Err(e) => tracing::warn!(
                "Discarding unreadable feed index for {}: {}",
                self.inner.actor,
                e
            ),
        }
    }

    /// First page of `query`.
    ///
    /// Prefers an unexpired cache; otherwise fetches from the remote store.
    /// `page_size == 0` uses the configured default.
    pub async fn load(&self, query: &Query, page_size: usize) -> FeedPage {
        let key = query.cache_key();
        let page_size = if page_size == 0 {
            self.inner.options.default_page_size
        } else {
            page_size
        };
        self.inner.restore(query, page_size).await;

        let now = self.inner.ctx.now_ms();
        let reachable = self.inner.ctx.connectivity.is_reachable();
        {
            let mut chains = lock(&self.inner.chains);
            let slot = chains
                .entry(key.clone())
                .or_insert_with(|| ChainSlot::new(query, page_size));
            slot.page_size = page_size;

            if slot.chain.is_loaded() {
                if !slot.chain.is_expired(now) {
                    slot.chain.set_stale(false);
                    tracing::debug!("Serving cached feed {}", key);
                    return self.inner.page_of(&slot.chain, None);
                }
                if !reachable {
                    slot.chain.set_stale(true);
                    slot.refresh_scheduled = true;
                    tracing::info!("Serving stale feed {} until reconnect", key);
                    return self.inner.page_of(&slot.chain, None);
                }
            } else if !reachable {
                return FeedPage {
                    error: Some(SyncError::NetworkUnavailable(
                        "no cached feed while offline".into(),
                    )),
                    ..FeedPage::default()
                };
            }
        }
        self.refresh(query).await
    }

    /// Next page of `query`.
    ///
    /// A no-op returning no items when there are no more pages, another
    /// page or refresh is in flight, or the query was never loaded.
    /// Rejected with `NetworkUnavailable` while offline. A page started
    /// before a refresh completes is discarded with `StaleCursor`.
    pub async fn load_more(&self, query: &Query) -> FeedPage {
        let key = query.cache_key();
        let (page_size, generation, cursor) = {
            let mut chains = lock(&self.inner.chains);
            let Some(slot) = chains.get_mut(&key) else {
                return FeedPage::default();
            };
            let busy = slot.loading_more || slot.refreshing;
            if !slot.chain.is_loaded() || !slot.chain.has_more() || busy {
                return self.inner.page_with(&slot.chain, Vec::new(), None);
            }
            if !self.inner.ctx.connectivity.is_reachable() {
                return self.inner.page_with(
                    &slot.chain,
                    Vec::new(),
                    Some(SyncError::NetworkUnavailable("cannot page while offline".into())),
                );
            }
            slot.loading_more = true;
            (slot.page_size, slot.chain.generation(), slot.chain.cursor().cloned())
        };

        let result = self
            .inner
            .ctx
            .remote
            .fetch(query, page_size, cursor.as_ref())
            .await;

        let page = {
            let mut chains = lock(&self.inner.chains);
            let Some(slot) = chains.get_mut(&key) else {
                return FeedPage::default();
            };
            slot.loading_more = false;
            match result {
                Ok(remote) => {
                    let items = to_items(&remote.documents);
                    let filter = &self.inner.filter;
                    let appended = slot.chain.append_page(
                        generation,
                        cursor.as_ref(),
                        items,
                        remote.next_cursor,
                        |item| filter.is_visible(&item.owner_id),
                    );
                    match appended {
                        Ok(fresh) => {
                            tracing::debug!("Feed {}: {} more items", key, fresh.len());
                            Ok(self.inner.page_with(&slot.chain, fresh, None))
                        }
                        Err(ChainError::StaleCursor | ChainError::CursorReused) => {
                            tracing::debug!("Feed {}: discarding page from before refresh", key);
                            Err(self
                                .inner
                                .page_with(&slot.chain, Vec::new(), Some(SyncError::StaleCursor)))
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Feed {}: load_more failed: {}", key, e);
                    Err(self.inner.page_with(&slot.chain, Vec::new(), Some(e)))
                }
            }
        };

        match page {
            Ok(page) => {
                self.inner.persist(&key).await;
                self.inner.emit_changed(&key);
                page
            }
            Err(page) => page,
        }
    }

    /// Re-fetch the first page of `query`, replacing the chain.
    ///
    /// On failure the current chain is kept and the error reported.
    pub async fn refresh(&self, query: &Query) -> FeedPage {
        self.inner.refresh(query).await
    }

    /// Attach a live listener for `query`.
    ///
    /// New items are prepended (or appended to a fully loaded ascending
    /// chain) when they pass the relationship filter and are not already in
    /// the chain.
    pub async fn subscribe_live(&self, query: &Query) -> Result<LiveSubscription, SyncError> {
        let key = query.cache_key();
        {
            let mut chains = lock(&self.inner.chains);
            let page_size = self.inner.options.default_page_size;
            chains
                .entry(key.clone())
                .or_insert_with(|| ChainSlot::new(query, page_size));
        }

        let mut feed = self.inner.ctx.remote.watch(query).await?;
        let active = Arc::new(AtomicBool::new(true));
        let weak = Arc::downgrade(&self.inner);
        let flag = Arc::clone(&active);

        let task = tokio::spawn(async move {
            while let Some(change) = feed.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.apply_live(&key, &flag, change) {
                    inner.persist(&key).await;
                    inner.emit_changed(&key);
                }
            }
        });

        {
            let mut live = lock(&self.inner.live);
            live.retain(|(flag, _)| flag.load(Ordering::SeqCst));
            live.push((Arc::clone(&active), task.abort_handle()));
        }
        Ok(LiveSubscription {
            active,
            task: task.abort_handle(),
            feed: Arc::downgrade(&self.inner),
        })
    }

    /// Visible items of `query`.
    pub fn items(&self, query: &Query) -> Vec<Item> {
        let chains = lock(&self.inner.chains);
        chains
            .get(&query.cache_key())
            .map(|slot| self.inner.visible(&slot.chain))
            .unwrap_or_default()
    }

    /// Re-apply the relationship filter to every cached chain.
    pub fn refilter(&self) {
        let changed: Vec<String> = {
            let mut chains = lock(&self.inner.chains);
            let filter = &self.inner.filter;
            chains
                .iter_mut()
                .filter_map(|(key, slot)| {
                    slot.chain
                        .refilter(|item| filter.is_visible(&item.owner_id))
                        .then(|| key.clone())
                })
                .collect()
        };
        for key in changed {
            tracing::debug!("Feed {} re-filtered", key);
            self.inner.emit_changed(&key);
        }
    }

    /// Run the refreshes scheduled while offline. Each runs once.
    pub async fn on_reconnect(&self) {
        let due: Vec<Query> = {
            let mut chains = lock(&self.inner.chains);
            chains
                .values_mut()
                .filter(|slot| slot.refresh_scheduled)
                .map(|slot| {
                    slot.refresh_scheduled = false;
                    slot.query.clone()
                })
                .collect()
        };
        for query in due {
            let page = self.inner.refresh(&query).await;
            if let Some(e) = page.error {
                tracing::warn!("Scheduled refresh of {} failed: {}", query.cache_key(), e);
            }
        }
    }

    /// Delete persisted chains that expired more than
    /// `stale_retention_ms` ago. Chains loaded in this session are kept.
    /// Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.inner.ctx.now_ms();
        let retention = self.inner.options.stale_retention_ms;
        let store = self.inner.ctx.store.as_ref();
        let keys_now: Vec<String> = {
            let chains = lock(&self.inner.chains);
            lock(&self.inner.index)
                .iter()
                .filter(|key| !chains.contains_key(*key))
                .cloned()
                .collect()
        };

        let mut purged = Vec::new();
        for key in keys_now {
            let storage_key = keys::feed(&self.inner.actor, &key);
            let expired = match get_json::<CachedPage>(store, &storage_key).await {
                Ok(Some(page)) => now >= page.expires_at.saturating_add(retention),
                Ok(None) => true,
                Err(e) => {
                    tracing::warn!("Purging unreadable feed cache {}: {}", key, e);
                    true
                }
            };
            if expired {
                purged.push(storage_key);
                lock(&self.inner.index).remove(&key);
            }
        }
        if purged.is_empty() {
            return 0;
        }

        if let Err(e) = store.multi_remove(&purged).await {
            tracing::warn!("Failed to purge expired feeds: {}", e);
        }
        self.inner.persist_index().await;
        tracing::info!("Purged {} expired feed caches", purged.len());
        purged.len()
    }

    /// Register a listener for feed changes.
    pub fn subscribe(&self, listener: impl Fn(&FeedEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    /// Detach every live listener and drop in-memory chains.
    pub fn dispose(&self) {
        {
            let mut chains = lock(&self.inner.chains);
            for (active, task) in lock(&self.inner.live).drain(..) {
                active.store(false, Ordering::SeqCst);
                task.abort();
            }
            chains.clear();
        }
        self.inner.listeners.clear();
    }
}

impl FeedInner {
    fn visible(&self, chain: &PageChain) -> Vec<Item> {
        chain
            .visible_items()
            .into_iter()
            .filter(|item| self.filter.is_visible(&item.owner_id))
            .collect()
    }

    fn page_of(&self, chain: &PageChain, error: Option<SyncError>) -> FeedPage {
        self.page_with(chain, self.visible(chain), error)
    }

    fn page_with(&self, chain: &PageChain, items: Vec<Item>, error: Option<SyncError>) -> FeedPage {
        FeedPage {
            items,
            cursor: chain.cursor().cloned(),
            has_more: chain.has_more(),
            stale: chain.is_stale(),
            error,
        }
    }

    fn emit_changed(&self, key: &str) {
        self.listeners.emit(&FeedEvent::Changed { key: key.to_string() });
    }

    /// Bring a persisted chain into memory if the query has none loaded.
    async fn restore(&self, query: &Query, page_size: usize) {
        let key = query.cache_key();
        let loaded = lock(&self.chains)
            .get(&key)
            .map(|slot| slot.chain.is_loaded())
            .unwrap_or(false);
        if loaded {
            return;
        }

        let storage_key = keys::feed(&self.actor, &key);
        let cached = match get_json::<CachedPage>(self.ctx.store.as_ref(), &storage_key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Ignoring unreadable feed cache {}: {}", key, e);
                None
            }
        };
        let Some(cached) = cached else {
            return;
        };

        let mut chains = lock(&self.chains);
        let slot = chains
            .entry(key.clone())
            .or_insert_with(|| ChainSlot::new(query, page_size));
        if slot.chain.is_loaded() {
            return;
        }
        let mut chain = PageChain::from_cached(cached, query.direction());
        chain.refilter(|item| self.filter.is_visible(&item.owner_id));
        slot.chain = chain;
        tracing::debug!("Restored feed cache {}", key);
    }

    async fn refresh(&self, query: &Query) -> FeedPage {
        let key = query.cache_key();
        let (page_size, seq) = {
            let mut chains = lock(&self.chains);
            let default_size = self.options.default_page_size;
            let slot = chains
                .entry(key.clone())
                .or_insert_with(|| ChainSlot::new(query, default_size));
            slot.refreshing = true;
            slot.refresh_seq += 1;
            slot.buffered.clear();
            slot.chain.invalidate();
            (slot.page_size, slot.refresh_seq)
        };

        let result = self.ctx.remote.fetch(query, page_size, None).await;
        let now = self.ctx.now_ms();

        let page = {
            let mut chains = lock(&self.chains);
            let Some(slot) = chains.get_mut(&key) else {
                return FeedPage::default();
            };
            if slot.refresh_seq != seq {
                // a newer refresh owns the chain
                return self.page_of(&slot.chain, None);
            }
            slot.refreshing = false;
            let buffered = std::mem::take(&mut slot.buffered);

            match result {
                Ok(remote) => {
                    let items = to_items(&remote.documents);
                    let filter = &self.filter;
                    let visible = |item: &Item| filter.is_visible(&item.owner_id);
                    slot.chain
                        .replace(items, remote.next_cursor, now, self.options.ttl_ms, visible);
                    for change in &buffered {
                        apply_change(&mut slot.chain, change, filter.as_ref());
                    }
                    slot.refresh_scheduled = false;
                    tracing::debug!("Feed {} refreshed: {} items", key, slot.chain.visible_len());
                    Ok(self.page_of(&slot.chain, None))
                }
                Err(e) => {
                    tracing::warn!("Feed {} refresh failed: {}", key, e);
                    Err(self.page_of(&slot.chain, Some(e)))
                }
            }
        };

        match page {
            Ok(page) => {
                self.persist(&key).await;
                self.emit_changed(&key);
                page
            }
            Err(page) => page,
        }
    }

    /// Apply one live change. Returns true if the visible chain changed.
    fn apply_live(&self, key: &str, active: &AtomicBool, change: LiveChange) -> bool {
        let mut chains = lock(&self.chains);
        if !active.load(Ordering::SeqCst) {
            return false;
        }
        let Some(slot) = chains.get_mut(key) else {
            return false;
        };
        let changed = apply_change(&mut slot.chain, &change, self.filter.as_ref());
        if slot.refreshing {
            // replayed onto the replacement chain
            slot.buffered.push(change);
        }
        changed
    }

    async fn persist(&self, key: &str) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = lock(&self.chains)
            .get(key)
            .filter(|slot| slot.chain.is_loaded())
            .map(|slot| slot.chain.to_cached());
        let Some(page) = snapshot else {
            return;
        };

        let storage_key = keys::feed(&self.actor, key);
        if let Err(e) = set_json(self.ctx.store.as_ref(), &storage_key, &page).await {
            tracing::warn!("Failed to persist feed cache {}: {}", key, e);
            return;
        }
        let added = lock(&self.index).insert(key.to_string());
        if added {
            self.write_index().await;
        }
    }

    async fn persist_index(&self) {
        let _guard = self.persist_lock.lock().await;
        self.write_index().await;
    }

    async fn write_index(&self) {
        let index = lock(&self.index).clone();
        let key = keys::feed_index(&self.actor);
        if let Err(e) = set_json(self.ctx.store.as_ref(), &key, &index).await {
            tracing::warn!("Failed to persist feed index for {}: {}", self.actor, e);
        }
    }
}

fn to_items(docs: &[Document]) -> Vec<Item> {
    docs.iter()
        .filter_map(|doc| match Item::from_document(doc) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("Skipping malformed item {}: {}", doc.id, e);
                None
            }
        })
        .collect()
}

fn apply_change(chain: &mut PageChain, change: &LiveChange, filter: &dyn ContentFilter) -> bool {
    match change {
        LiveChange::Added(doc) | LiveChange::Modified(doc) => {
            let Ok(item) = Item::from_document(doc) else {
                tracing::warn!("Ignoring malformed live item {}", doc.id);
                return false;
            };
            let visible = filter.is_visible(&item.owner_id);
            if matches!(change, LiveChange::Modified(_)) {
                return chain.update_live(item, visible) && visible;
            }
            match chain.insert_live(item, visible) {
                LiveOutcome::Inserted => true,
                LiveOutcome::Duplicate | LiveOutcome::Filtered | LiveOutcome::Deferred => false,
            }
        }
        LiveChange::Removed(doc) => chain.remove(&ItemId::new(doc.id.clone())),
    }
}
