//! References to remote documents and queries.
//!
//! Paths use `/` separated segments. A document path has an even number of
//! segments (`users/alice`), a collection path an odd number (`users`,
//! `users/alice/posts`).

use crate::error::{StoreError, StoreResult};
use mirrorsync_value::{FieldPath, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

fn split_segments(path: &str) -> StoreResult<Vec<&str>> {
    if path.is_empty() {
        return Err(StoreError::invalid_reference(path, "path is empty"));
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::invalid_reference(path, "path has an empty segment"));
    }
    Ok(segments)
}

/// Path of a single document, such as `users/alice`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath(String);

impl DocumentPath {
    /// Parses a document path.
    pub fn parse(path: &str) -> StoreResult<Self> {
        let segments = split_segments(path)?;
        if segments.len() % 2 != 0 {
            return Err(StoreError::invalid_reference(
                path,
                "document paths need an even number of segments",
            ));
        }
        Ok(Self(path.to_string()))
    }

    /// Returns the document identifier (the last segment).
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns the collection containing this document.
    pub fn parent(&self) -> CollectionPath {
        let parent = self.0.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        CollectionPath(parent.to_string())
    }

    /// Returns the path as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentPath {
    type Error = StoreError;

    fn try_from(path: String) -> StoreResult<Self> {
        Self::parse(&path)
    }
}

impl From<DocumentPath> for String {
    fn from(path: DocumentPath) -> Self {
        path.0
    }
}

/// Path of a collection, such as `users` or `users/alice/posts`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Parses a collection path.
    pub fn parse(path: &str) -> StoreResult<Self> {
        let segments = split_segments(path)?;
        if segments.len() % 2 != 1 {
            return Err(StoreError::invalid_reference(
                path,
                "collection paths need an odd number of segments",
            ));
        }
        Ok(Self(path.to_string()))
    }

    /// Returns the path of a document in this collection.
    pub fn doc(&self, id: &str) -> StoreResult<DocumentPath> {
        DocumentPath::parse(&format!("{}/{}", self.0, id))
    }

    /// Returns the path as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CollectionPath {
    type Error = StoreError;

    fn try_from(path: String) -> StoreResult<Self> {
        Self::parse(&path)
    }
}

impl From<CollectionPath> for String {
    fn from(path: CollectionPath) -> Self {
        path.0
    }
}

/// An equality filter on a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field to compare.
    pub field: FieldPath,
    /// Value the field must equal.
    pub value: Value,
}

/// Sort direction for query ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// One ordering clause of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field to order by.
    pub field: FieldPath,
    /// Sort direction.
    #[serde(default)]
    pub direction: Direction,
}

/// A query over one collection.
///
/// Filters are combined with AND, so their order does not matter. Ordering
/// clauses are applied in sequence, with the document id as final
/// tie-breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Collection being queried.
    pub collection: CollectionPath,
    /// Equality filters.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Ordering clauses.
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Maximum number of results.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QuerySpec {
    /// Creates a query returning every document of a collection.
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Adds an equality filter.
    pub fn where_eq(mut self, field: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Adds an ordering clause.
    pub fn order_by(mut self, field: impl Into<FieldPath>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the canonical serialization of this query.
    ///
    /// A bare collection query serializes to the collection path. Filters
    /// are sorted so that equivalent queries produce the same text. Field
    /// names are quoted and filter values carry their kind, so distinct
    /// queries never share a serialization.
    pub fn canonical(&self) -> String {
        let mut out = self.collection.as_str().to_string();
        let mut clauses = Vec::new();

        let mut filters: Vec<String> = self
            .filters
            .iter()
            .map(|f| {
                let mut clause = format!("where={:?}==", f.field.as_str());
                write_canonical_value(&mut clause, &f.value);
                clause
            })
            .collect();
        filters.sort();
        filters.dedup();
        clauses.extend(filters);

        for order in &self.order_by {
            let direction = match order.direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            clauses.push(format!("orderBy={:?}:{}", order.field.as_str(), direction));
        }
        if let Some(limit) = self.limit {
            clauses.push(format!("limit={limit}"));
        }

        for (i, clause) in clauses.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            let _ = write!(out, "{sep}{clause}");
        }
        out
    }
}

/// Writes a kind-tagged rendering of `value` for query keys.
///
/// Values that compare unequal render differently; `0.0` and `-0.0`
/// compare equal and render the same.
fn write_canonical_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Integer(n) => {
            let _ = write!(out, "int:{n}");
        }
        Value::Float(x) => {
            let x = if *x == 0.0 { 0.0 } else { *x };
            let _ = write!(out, "float:{x:?}");
        }
        Value::Text(text) => {
            let _ = write!(out, "{text:?}");
        }
        Value::Bytes(bytes) => {
            out.push_str("bytes:");
            for byte in bytes {
                let _ = write!(out, "{byte:02x}");
            }
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_value(out, item);
            }
            out.push(']');
        }
        Value::Map(fields) => {
            out.push('{');
            for (i, (key, item)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{key:?}:");
                write_canonical_value(out, item);
            }
            out.push('}');
        }
    }
}

/// Canonical identity of a remote reference.
///
/// Two references the store treats as equivalent produce identical keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    /// Returns the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference to something that can be mirrored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// A single document.
    Document(DocumentPath),
    /// A query (or a whole collection) yielding many documents.
    Query(QuerySpec),
}

impl Reference {
    /// Creates a document reference from a path.
    pub fn doc(path: &str) -> StoreResult<Self> {
        DocumentPath::parse(path).map(Reference::Document)
    }

    /// Creates a reference to every document of a collection.
    pub fn collection(path: &str) -> StoreResult<Self> {
        CollectionPath::parse(path).map(|c| Reference::Query(QuerySpec::new(c)))
    }

    /// Creates a query reference.
    pub fn query(spec: QuerySpec) -> Self {
        Reference::Query(spec)
    }

    /// Parses a path into a document or collection reference.
    ///
    /// Paths with an even number of segments name documents, odd ones
    /// collections.
    pub fn parse(path: &str) -> StoreResult<Self> {
        if split_segments(path)?.len() % 2 == 0 {
            Self::doc(path)
        } else {
            Self::collection(path)
        }
    }

    /// Returns true if this references a single document.
    pub fn is_document(&self) -> bool {
        matches!(self, Reference::Document(_))
    }

    /// Returns the canonical subscription key.
    pub fn key(&self) -> SubscriptionKey {
        match self {
            Reference::Document(path) => SubscriptionKey(path.as_str().to_string()),
            Reference::Query(spec) => SubscriptionKey(spec.canonical()),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key().as_str())
    }
}

impl From<DocumentPath> for Reference {
    fn from(path: DocumentPath) -> Self {
        Reference::Document(path)
    }
}

impl From<QuerySpec> for Reference {
    fn from(spec: QuerySpec) -> Self {
        Reference::Query(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_path_parts() {
        let path = DocumentPath::parse("users/alice/posts/p1").unwrap();
        assert_eq!(path.id(), "p1");
        assert_eq!(path.parent().as_str(), "users/alice/posts");
    }

    #[test]
    fn path_parity_is_checked() {
        assert!(DocumentPath::parse("users").is_err());
        assert!(DocumentPath::parse("").is_err());
        assert!(DocumentPath::parse("users//alice").is_err());
        assert!(CollectionPath::parse("users/alice").is_err());
        assert!(CollectionPath::parse("users/alice/posts").is_ok());
    }

    #[test]
    fn collection_doc_builds_child_path() {
        let users = CollectionPath::parse("users").unwrap();
        assert_eq!(users.doc("bob").unwrap().as_str(), "users/bob");
        assert!(users.doc("a/b").is_err());
    }

    #[test]
    fn document_key_is_path() {
        let reference = Reference::doc("users/alice").unwrap();
        assert_eq!(reference.key().as_str(), "users/alice");
        assert!(reference.is_document());
    }

    #[test]
    fn parse_picks_kind_by_parity() {
        assert!(Reference::parse("users/alice").unwrap().is_document());
        assert!(!Reference::parse("users").unwrap().is_document());
        assert!(Reference::parse("").is_err());
        assert!(Reference::parse("users/").is_err());
    }

    #[test]
    fn collection_key_is_collection_path() {
        let reference = Reference::collection("users").unwrap();
        assert_eq!(reference.key().as_str(), "users");
    }

    #[test]
    fn filter_order_does_not_change_key() {
        let users = CollectionPath::parse("users").unwrap();
        let a = QuerySpec::new(users.clone())
            .where_eq("city", "Oslo")
            .where_eq("age", 30)
            .limit(5);
        let b = QuerySpec::new(users)
            .where_eq("age", 30)
            .where_eq("city", "Oslo")
            .limit(5);

        assert_eq!(Reference::query(a).key(), Reference::query(b).key());
    }

    #[test]
    fn distinct_queries_have_distinct_keys() {
        let users = CollectionPath::parse("users").unwrap();
        let base = QuerySpec::new(users);
        let keys = [
            Reference::query(base.clone()).key(),
            Reference::query(base.clone().where_eq("age", 30)).key(),
            Reference::query(base.clone().where_eq("age", "30")).key(),
            Reference::query(base.clone().order_by("age", Direction::Asc)).key(),
            Reference::query(base.clone().order_by("age", Direction::Desc)).key(),
            Reference::query(base.limit(1)).key(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn canonical_query_text() {
        let spec = QuerySpec::new(CollectionPath::parse("users").unwrap())
            .where_eq("age", 30)
            .order_by("name", Direction::Asc)
            .limit(10);
        assert_eq!(
            spec.canonical(),
            r#"users?where="age"==int:30&orderBy="name":asc&limit=10"#
        );
    }

    #[test]
    fn filter_value_kinds_give_distinct_keys() {
        let users = QuerySpec::new(CollectionPath::parse("users").unwrap());
        let values = [
            Value::Bytes(vec![1, 2]),
            Value::Array(vec![Value::Integer(1), Value::Integer(2)]),
            Value::Array(vec![Value::Float(1.0), Value::Float(2.0)]),
            Value::Integer(1),
            Value::Float(1.0),
            Value::Text("1".into()),
            Value::Bool(true),
            Value::Text("true".into()),
            Value::Null,
            Value::Text("null".into()),
            Value::map([("a", Value::Integer(1))]),
        ];
        let keys: Vec<SubscriptionKey> = values
            .iter()
            .map(|v| Reference::query(users.clone().where_eq("tag", v.clone())).key())
            .collect();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn field_names_cannot_forge_clauses() {
        let users = QuerySpec::new(CollectionPath::parse("users").unwrap());
        let forged = users.clone().where_eq("a==int:1&where=\"b\"", 2);
        let honest = users.where_eq("a", 1).where_eq("b", 2);
        assert_ne!(Reference::query(forged).key(), Reference::query(honest).key());
    }

    #[test]
    fn signed_zero_filters_share_a_key() {
        let users = QuerySpec::new(CollectionPath::parse("users").unwrap());
        let a = Reference::query(users.clone().where_eq("x", Value::Float(0.0))).key();
        let b = Reference::query(users.where_eq("x", Value::Float(-0.0))).key();
        assert_eq!(a, b);
    }

    #[test]
    fn reference_deserializes_with_validation() {
        let reference: Reference = serde_json::from_str(r#"{"document": "users/alice"}"#).unwrap();
        assert_eq!(reference, Reference::doc("users/alice").unwrap());

        let invalid = serde_json::from_str::<Reference>(r#"{"document": "users"}"#);
        assert!(invalid.is_err());
    }
}
