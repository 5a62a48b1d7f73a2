//! Remote document store abstraction.
//!
//! The engine talks to its backend only through [`RemoteStore`]:
//! - `fetch()` runs one page of a query
//! - `write()` applies a mutation under an idempotency key
//! - `watch()` opens a live listener on a query
//!
//! # Example
//!
//! ```ignore
//! let remote = MockRemoteStore::new();
//! let page = remote.fetch(&Query::collection("posts"), 20, None).await?;
//! let mut live = remote.watch(&Query::collection("posts")).await?;
//! while let Some(change) = live.next().await { /* ... */ }
//! ```

mod mock;

pub use mock::{MockRemoteStore, RemoteHold};

use async_trait::async_trait;
use sync_types::{LiveChange, Mutation, OperationId, PageCursor, Query, RemotePage, SyncError};
use tokio::sync::mpsc;

/// Outcome of a remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    /// False when the idempotency key had already been applied and the
    /// write was a no-op.
    pub applied: bool,
}

/// Stream of live changes for one query.
///
/// Dropping the feed unsubscribes from the remote listener.
pub struct LiveFeed {
    changes: mpsc::UnboundedReceiver<LiveChange>,
    _guard: Option<Box<dyn Send + Sync>>,
}

impl LiveFeed {
    /// Wrap a change channel. `guard` is dropped with the feed and should
    /// detach the remote listener.
    pub fn new(
        changes: mpsc::UnboundedReceiver<LiveChange>,
        guard: Option<Box<dyn Send + Sync>>,
    ) -> Self {
        Self {
            changes,
            _guard: guard,
        }
    }

    /// Next change, or `None` once the remote side closed the listener.
    pub async fn next(&mut self) -> Option<LiveChange> {
        self.changes.recv().await
    }
}

impl std::fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed").finish_non_exhaustive()
    }
}

/// Trait for remote document stores.
///
/// Implementations map backend failures onto [`SyncError`] so callers can
/// decide retry vs. abandon from the variant alone.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch up to `limit` documents of `query`, starting after `start_after`.
    async fn fetch(
        &self,
        query: &Query,
        limit: usize,
        start_after: Option<&PageCursor>,
    ) -> Result<RemotePage, SyncError>;

    /// Apply `mutation`. Replaying the same `key` must not apply it twice.
    async fn write(&self, key: OperationId, mutation: &Mutation) -> Result<WriteAck, SyncError>;

    /// Open a live listener. Only changes after the call are delivered.
    async fn watch(&self, query: &Query) -> Result<LiveFeed, SyncError>;
}
