//! Queued remote mutations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{OperationId, UserId};

/// A write against the remote document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Create or overwrite a document.
    Set {
        /// Target collection.
        collection: String,
        /// Document id.
        id: String,
        /// Full document body.
        data: Value,
    },
    /// Merge fields into an existing document.
    Update {
        /// Target collection.
        collection: String,
        /// Document id.
        id: String,
        /// Fields to merge.
        data: Value,
    },
    /// Delete a document (deleting a missing document succeeds).
    Delete {
        /// Target collection.
        collection: String,
        /// Document id.
        id: String,
    },
}

impl Mutation {
    /// Collection the mutation targets.
    pub fn collection(&self) -> &str {
        match self {
            Mutation::Set { collection, .. }
            | Mutation::Update { collection, .. }
            | Mutation::Delete { collection, .. } => collection,
        }
    }

    /// Document id the mutation targets.
    pub fn document_id(&self) -> &str {
        match self {
            Mutation::Set { id, .. }
            | Mutation::Update { id, .. }
            | Mutation::Delete { id, .. } => id,
        }
    }
}

/// What a queued operation is for. Lets resolution handlers route outcomes
/// without decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Create the block relation current actor → target.
    Block {
        /// Blocked user.
        target: UserId,
    },
    /// Remove the block relation current actor → target.
    Unblock {
        /// Unblocked user.
        target: UserId,
    },
    /// Any other content write.
    Write,
}

impl OperationKind {
    /// Relationship target, for block/unblock operations.
    pub fn relation_target(&self) -> Option<&UserId> {
        match self {
            OperationKind::Block { target } | OperationKind::Unblock { target } => Some(target),
            OperationKind::Write => None,
        }
    }
}

/// A mutation waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Idempotency key, sent with every attempt.
    pub id: OperationId,
    /// Routing tag.
    pub kind: OperationKind,
    /// The remote write.
    pub mutation: Mutation,
    /// Milliseconds since the Unix epoch.
    pub enqueued_at: u64,
    /// Number of remote attempts made so far.
    #[serde(default)]
    pub attempts: u32,
    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Create a fresh operation with a new idempotency key.
    pub fn new(kind: OperationKind, mutation: Mutation, enqueued_at: u64) -> Self {
        Self::with_id(OperationId::new(), kind, mutation, enqueued_at)
    }

    /// Create an operation with a caller-chosen idempotency key.
    pub fn with_id(
        id: OperationId,
        kind: OperationKind,
        mutation: Mutation,
        enqueued_at: u64,
    ) -> Self {
        Self {
            id,
            kind,
            mutation,
            enqueued_at,
            attempts: 0,
            last_error: None,
        }
    }
}
