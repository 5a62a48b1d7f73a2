//! Mock remote store for testing.
//!
//! An in-memory document database with query evaluation, live listeners,
//! idempotency-key dedup, and failure injection.

use super::{LiveFeed, RemoteStore, WriteAck};
use crate::observe::lock;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use sync_types::{
    compare_values, Direction, Document, LiveChange, Mutation, OperationId, PageCursor, Query,
    RemotePage, SyncError,
};
use tokio::sync::{mpsc, oneshot};

/// Field used for ordering when a query does not name one.
const DEFAULT_ORDER_FIELD: &str = "timestamp";

/// Mock remote store for testing.
///
/// Clones share the same database.
#[derive(Debug, Default, Clone)]
pub struct MockRemoteStore {
    inner: Arc<Mutex<MockRemoteInner>>,
}

#[derive(Debug, Default)]
struct MockRemoteInner {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    applied_keys: HashSet<OperationId>,
    applied_writes: Vec<(OperationId, Mutation)>,
    write_attempts: usize,
    fetches: usize,
    offline: bool,
    fail_next_fetch: Option<SyncError>,
    write_failures: VecDeque<SyncError>,
    fail_writes: Option<SyncError>,
    lose_next_ack: bool,
    fetch_holds: VecDeque<oneshot::Receiver<()>>,
    write_holds: VecDeque<oneshot::Receiver<()>>,
    watchers: Vec<Watcher>,
    next_watcher: u64,
}

#[derive(Debug)]
struct Watcher {
    id: u64,
    query: Query,
    sender: mpsc::UnboundedSender<LiveChange>,
}

/// Handle that keeps one remote call suspended until released.
#[derive(Debug)]
pub struct RemoteHold {
    release: oneshot::Sender<()>,
}

impl RemoteHold {
    /// Let the held call complete.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

struct WatchGuard {
    id: u64,
    inner: Weak<Mutex<MockRemoteInner>>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner).watchers.retain(|w| w.id != self.id);
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CursorToken {
    v: Option<Value>,
    id: String,
}

impl MockRemoteStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document as if another client wrote it.
    ///
    /// Live listeners are notified.
    pub fn insert_document(&self, collection: &str, doc: Document) {
        let mut inner = lock(&self.inner);
        inner.put(collection, &doc.id, doc.data);
    }

    /// Delete a document as if another client deleted it.
    pub fn remove_document(&self, collection: &str, id: &str) {
        let mut inner = lock(&self.inner);
        inner.delete(collection, id);
    }

    /// Read a document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        let inner = lock(&self.inner);
        inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone()))
    }

    /// Every document of a collection, by id.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        let inner = lock(&self.inner);
        inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Writes that were applied, in order (replays excluded).
    pub fn applied_writes(&self) -> Vec<(OperationId, Mutation)> {
        lock(&self.inner).applied_writes.clone()
    }

    /// Number of `write()` calls, including failed and replayed ones.
    pub fn write_attempts(&self) -> usize {
        lock(&self.inner).write_attempts
    }

    /// Number of `fetch()` calls.
    pub fn fetch_count(&self) -> usize {
        lock(&self.inner).fetches
    }

    /// Number of open live listeners.
    pub fn watcher_count(&self) -> usize {
        lock(&self.inner).watchers.len()
    }

    /// Make every call fail with `NetworkUnavailable` while `true`.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.inner).offline = offline;
    }

    /// Cause the next fetch() to fail with the given error.
    pub fn fail_next_fetch(&self, error: SyncError) {
        lock(&self.inner).fail_next_fetch = Some(error);
    }

    /// Queue a failure for the next write() (failures queue up in order).
    pub fn fail_next_write(&self, error: SyncError) {
        lock(&self.inner).write_failures.push_back(error);
    }

    /// Make every write fail with `error` until cleared with `None`.
    pub fn fail_writes(&self, error: Option<SyncError>) {
        lock(&self.inner).fail_writes = error;
    }

    /// Apply the next write but report `NetworkUnavailable`, as if the
    /// acknowledgement was lost on the way back.
    pub fn lose_next_ack(&self) {
        lock(&self.inner).lose_next_ack = true;
    }

    /// Suspend the next fetch() until the returned hold is released.
    pub fn hold_next_fetch(&self) -> RemoteHold {
        let (release, wait) = oneshot::channel();
        lock(&self.inner).fetch_holds.push_back(wait);
        RemoteHold { release }
    }

    /// Suspend the next write() until the returned hold is released.
    pub fn hold_next_write(&self) -> RemoteHold {
        let (release, wait) = oneshot::channel();
        lock(&self.inner).write_holds.push_back(wait);
        RemoteHold { release }
    }
}

impl MockRemoteInner {
    fn put(&mut self, collection: &str, id: &str, data: Value) {
        let before = self
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data.clone());
        self.notify(collection, id, before, Some(data));
    }

    fn delete(&mut self, collection: &str, id: &str) {
        let before = self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        if before.is_some() {
            self.notify(collection, id, before, None);
        }
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<(), SyncError> {
        match mutation {
            Mutation::Set { collection, id, data } => {
                self.put(collection, id, data.clone());
            }
            Mutation::Update { collection, id, data } => {
                let mut merged = self
                    .collections
                    .get(collection)
                    .and_then(|docs| docs.get(id))
                    .cloned()
                    .ok_or_else(|| {
                        SyncError::RemoteRejected(format!("document {collection}/{id} not found"))
                    })?;
                match (&mut merged, data) {
                    (Value::Object(target), Value::Object(fields)) => {
                        for (key, value) in fields {
                            target.insert(key.clone(), value.clone());
                        }
                    }
                    _ => {
                        return Err(SyncError::RemoteRejected(format!(
                            "update of {collection}/{id} needs object bodies"
                        )))
                    }
                }
                self.put(collection, id, merged);
            }
            Mutation::Delete { collection, id } => {
                self.delete(collection, id);
            }
        }
        Ok(())
    }

    fn notify(&mut self, collection: &str, id: &str, before: Option<Value>, after: Option<Value>) {
        let before = before.map(|data| Document::new(id, data));
        let after = after.map(|data| Document::new(id, data));

        self.watchers.retain(|watcher| {
            if watcher.query.collection != collection {
                return true;
            }
            let was = before.as_ref().filter(|d| watcher.query.matches(d));
            let is = after.as_ref().filter(|d| watcher.query.matches(d));
            let change = match (was, is) {
                (None, Some(doc)) => LiveChange::Added(doc.clone()),
                (Some(_), Some(doc)) => LiveChange::Modified(doc.clone()),
                (Some(doc), None) => LiveChange::Removed(doc.clone()),
                (None, None) => return true,
            };
            // a closed receiver means the listener was dropped
            watcher.sender.send(change).is_ok()
        });
    }

    fn run_query(
        &self,
        query: &Query,
        limit: usize,
        start_after: Option<&PageCursor>,
    ) -> Result<RemotePage, SyncError> {
        let field = query
            .order_by
            .as_ref()
            .map(|o| o.field.as_str())
            .unwrap_or(DEFAULT_ORDER_FIELD);
        let direction = query.direction();

        let mut docs: Vec<Document> = self
            .collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .filter(|doc| query.matches(doc))
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by(|a, b| order(a.field(field), &a.id, b.field(field), &b.id, direction));

        let start = match start_after {
            Some(cursor) => {
                let token = decode_cursor(cursor)?;
                docs.iter()
                    .position(|doc| {
                        let after = token.v.as_ref();
                        order(doc.field(field), &doc.id, after, &token.id, direction)
                            == Ordering::Greater
                    })
                    .unwrap_or(docs.len())
            }
            None => 0,
        };

        let documents: Vec<Document> = docs[start..].iter().take(limit.max(1)).cloned().collect();
        let end = start + documents.len();
        let next_cursor = match documents.last() {
            Some(last) if end < docs.len() => Some(encode_cursor(last.field(field), &last.id)?),
            _ => None,
        };
        Ok(RemotePage {
            documents,
            next_cursor,
        })
    }
}

/// Sort order of `(value, id)` pairs in `direction`.
fn order(
    a: Option<&Value>,
    a_id: &str,
    b: Option<&Value>,
    b_id: &str,
    direction: Direction,
) -> Ordering {
    let by_value = match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    let ascending = by_value.then_with(|| a_id.cmp(b_id));
    match direction {
        Direction::Ascending => ascending,
        Direction::Descending => ascending.reverse(),
    }
}

fn encode_cursor(value: Option<&Value>, id: &str) -> Result<PageCursor, SyncError> {
    let token = CursorToken {
        v: value.cloned(),
        id: id.to_string(),
    };
    let json = serde_json::to_vec(&token)?;
    Ok(PageCursor::new(URL_SAFE_NO_PAD.encode(json)))
}

fn decode_cursor(cursor: &PageCursor) -> Result<CursorToken, SyncError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.as_str())
        .map_err(|_| SyncError::StaleCursor)?;
    serde_json::from_slice(&bytes).map_err(|_| SyncError::StaleCursor)
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn fetch(
        &self,
        query: &Query,
        limit: usize,
        start_after: Option<&PageCursor>,
    ) -> Result<RemotePage, SyncError> {
        let hold = {
            let mut inner = lock(&self.inner);
            inner.fetches += 1;
            if inner.offline {
                return Err(SyncError::NetworkUnavailable("mock remote offline".into()));
            }
            if let Some(error) = inner.fail_next_fetch.take() {
                return Err(error);
            }
            inner.fetch_holds.pop_front()
        };
        if let Some(hold) = hold {
            // a dropped hold releases too
            let _ = hold.await;
        }
        lock(&self.inner).run_query(query, limit, start_after)
    }

    async fn write(&self, key: OperationId, mutation: &Mutation) -> Result<WriteAck, SyncError> {
        let hold = lock(&self.inner).write_holds.pop_front();
        if let Some(hold) = hold {
            let _ = hold.await;
        }

        let mut inner = lock(&self.inner);
        inner.write_attempts += 1;

        if inner.offline {
            return Err(SyncError::NetworkUnavailable("mock remote offline".into()));
        }
        if let Some(error) = inner.write_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = &inner.fail_writes {
            return Err(error.clone());
        }
        if inner.applied_keys.contains(&key) {
            return Ok(WriteAck { applied: false });
        }

        inner.apply(mutation)?;
        inner.applied_keys.insert(key);
        inner.applied_writes.push((key, mutation.clone()));

        if std::mem::take(&mut inner.lose_next_ack) {
            return Err(SyncError::NetworkUnavailable("acknowledgement lost".into()));
        }
        Ok(WriteAck { applied: true })
    }

    async fn watch(&self, query: &Query) -> Result<LiveFeed, SyncError> {
        let mut inner = lock(&self.inner);
        if inner.offline {
            return Err(SyncError::NetworkUnavailable("mock remote offline".into()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = inner.next_watcher;
        inner.next_watcher += 1;
        inner.watchers.push(Watcher {
            id,
            query: query.clone(),
            sender,
        });

        let guard = WatchGuard {
            id,
            inner: Arc::downgrade(&self.inner),
        };
        Ok(LiveFeed::new(receiver, Some(Box::new(guard))))
    }
}
