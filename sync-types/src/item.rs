//! Remote documents and the paginated content items built from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ItemId, PageCursor, SyncError, UserId};

/// A raw document as returned by the remote document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id, unique within its collection.
    pub id: String,
    /// Document body.
    pub data: Value,
}

impl Document {
    /// Create a document.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Look up a top-level field of the body.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// One page of documents returned by a remote query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemotePage {
    /// Documents in server order.
    pub documents: Vec<Document>,
    /// Token to pass as `start_after` for the next page; `None` when the
    /// query is exhausted.
    pub next_cursor: Option<PageCursor>,
}

/// A change pushed by a live remote listener.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveChange {
    /// A document started matching the query.
    Added(Document),
    /// A matching document changed.
    Modified(Document),
    /// A document stopped matching the query (carries its last body).
    Removed(Document),
}

impl LiveChange {
    /// The document the change refers to.
    pub fn document(&self) -> &Document {
        match self {
            LiveChange::Added(doc) | LiveChange::Modified(doc) | LiveChange::Removed(doc) => doc,
        }
    }
}

/// The generic unit of paginated content.
///
/// Created by the remote store. The sync engine never changes it apart from
/// the local `stale` flag attached when it is served from an expired cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Document id.
    pub id: ItemId,
    /// Author of the item; the key used for relationship filtering.
    pub owner_id: UserId,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Set locally when the item comes from an expired cache.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stale: bool,
    /// Remaining domain fields, passed through untouched.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Item {
    /// Build an item from a remote document.
    ///
    /// The document id becomes the item id; the body must carry `ownerId`
    /// and `timestamp`.
    pub fn from_document(doc: &Document) -> Result<Self, SyncError> {
        let mut body = match &doc.data {
            Value::Object(map) => map.clone(),
            other => {
                return Err(SyncError::Serialization(format!(
                    "document {} is not an object: {other}",
                    doc.id
                )))
            }
        };
        body.remove("stale");
        body.insert("id".into(), Value::String(doc.id.clone()));
        Ok(serde_json::from_value(Value::Object(body))?)
    }

    /// Look up a domain field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
