//! Block relations between users.

use serde::{Deserialize, Serialize};

use crate::{Document, SyncError, UserId};

/// `actor_id` has blocked `target_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRelation {
    /// The user who blocked.
    pub actor_id: UserId,
    /// The user who was blocked.
    pub target_id: UserId,
    /// Free-form reason given by the actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl BlockRelation {
    /// Create a relation.
    pub fn new(
        actor_id: UserId,
        target_id: UserId,
        reason: Option<String>,
        created_at: u64,
    ) -> Self {
        Self {
            actor_id,
            target_id,
            reason,
            created_at,
        }
    }

    /// Remote document id of the relation record.
    pub fn document_id(actor_id: &UserId, target_id: &UserId) -> String {
        format!("{actor_id}_{target_id}")
    }

    /// Remote document id of this relation.
    pub fn doc_id(&self) -> String {
        Self::document_id(&self.actor_id, &self.target_id)
    }

    /// Encode as a remote document.
    pub fn to_document(&self) -> Result<Document, SyncError> {
        Ok(Document::new(self.doc_id(), serde_json::to_value(self)?))
    }

    /// Decode a remote relation record.
    pub fn from_document(doc: &Document) -> Result<Self, SyncError> {
        Ok(serde_json::from_value(doc.data.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_roundtrip_uses_camel_case() {
        let rel = BlockRelation::new("x".into(), "y".into(), Some("spam".into()), 7);
        let doc = rel.to_document().unwrap();
        assert_eq!(doc.id, "x_y");
        assert_eq!(
            doc.data,
            json!({"actorId": "x", "targetId": "y", "reason": "spam", "createdAt": 7})
        );
        assert_eq!(BlockRelation::from_document(&doc).unwrap(), rel);
    }

    #[test]
    fn reason_is_optional() {
        let doc = Document::new("a_b", json!({"actorId": "a", "targetId": "b", "createdAt": 1}));
        let rel = BlockRelation::from_document(&doc).unwrap();
        assert!(rel.reason.is_none());
    }
}
