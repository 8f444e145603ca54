//! Change-feed snapshots.

use crate::reference::DocumentPath;
use mirrorsync_value::Value;
use serde::{Deserialize, Serialize};

/// Metadata attached to every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// The snapshot reflects local writes the service has not confirmed yet.
    pub has_pending_writes: bool,
    /// The snapshot was served from a local cache.
    pub from_cache: bool,
}

impl SnapshotMetadata {
    /// Metadata of a snapshot confirmed by the service.
    pub fn confirmed() -> Self {
        Self::default()
    }

    /// Metadata of a snapshot carrying unconfirmed local writes.
    pub fn pending() -> Self {
        Self {
            has_pending_writes: true,
            from_cache: true,
        }
    }
}

/// The state of one document at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Full path of the document.
    pub path: DocumentPath,
    /// Document data, `None` if the document does not exist.
    pub data: Option<Value>,
    /// Snapshot metadata.
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    /// Creates a snapshot of an existing document.
    pub fn existing(path: DocumentPath, data: Value, metadata: SnapshotMetadata) -> Self {
        Self {
            path,
            data: Some(data),
            metadata,
        }
    }

    /// Creates a snapshot of a missing document.
    pub fn missing(path: DocumentPath, metadata: SnapshotMetadata) -> Self {
        Self {
            path,
            data: None,
            metadata,
        }
    }

    /// Returns the document identifier.
    pub fn id(&self) -> &str {
        self.path.id()
    }

    /// Returns true if the document exists.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Returns the document data, or `Null` for a missing document.
    pub fn data(&self) -> Value {
        self.data.clone().unwrap_or(Value::Null)
    }
}

/// Classification of a change within a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The document entered the result set.
    Added,
    /// The document stayed in the result set and its data changed.
    Modified,
    /// The document left the result set.
    Removed,
}

/// One classified change of a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    /// What happened to the document.
    pub kind: ChangeKind,
    /// The document after the change (before it, for removals).
    pub doc: DocumentSnapshot,
    /// Position in the previous result, if it was there.
    pub old_index: Option<usize>,
    /// Position in the new result, if it is there.
    pub new_index: Option<usize>,
}

/// The result set of a query at a point in time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuerySnapshot {
    /// Documents in result order.
    pub docs: Vec<DocumentSnapshot>,
    /// Changes since the previous snapshot delivered to the same listener.
    pub changes: Vec<DocumentChange>,
    /// Snapshot metadata.
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

impl QuerySnapshot {
    /// Returns the identifiers of the documents in result order.
    pub fn ids(&self) -> Vec<&str> {
        self.docs.iter().map(DocumentSnapshot::id).collect()
    }

    /// Returns true if the result set is empty.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// A change-feed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Snapshot {
    /// Event of a document subscription.
    Document(DocumentSnapshot),
    /// Event of a query subscription.
    Query(QuerySnapshot),
}

impl Snapshot {
    /// Returns the snapshot metadata.
    pub fn metadata(&self) -> SnapshotMetadata {
        match self {
            Snapshot::Document(doc) => doc.metadata,
            Snapshot::Query(query) => query.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_document_has_null_data() {
        let path = DocumentPath::parse("users/ghost").unwrap();
        let snapshot = DocumentSnapshot::missing(path, SnapshotMetadata::confirmed());
        assert!(!snapshot.exists());
        assert_eq!(snapshot.data(), Value::Null);
        assert_eq!(snapshot.id(), "ghost");
    }

    #[test]
    fn query_snapshot_ids_follow_result_order() {
        let doc = |id: &str| {
            DocumentSnapshot::existing(
                DocumentPath::parse(&format!("users/{id}")).unwrap(),
                Value::empty_map(),
                SnapshotMetadata::confirmed(),
            )
        };
        let snapshot = QuerySnapshot {
            docs: vec![doc("b"), doc("a")],
            changes: Vec::new(),
            metadata: SnapshotMetadata::confirmed(),
        };
        assert_eq!(snapshot.ids(), vec!["b", "a"]);
    }
}
