//! Partial-update patches.
//!
//! A [`Patch`] maps dotted field paths to the values that should be written
//! at those paths. Applying a patch merges it into a document: fields not
//! named by the patch are left untouched, and a patch can never remove a
//! field.

use crate::equality::deep_equal_opt;
use crate::error::{ValueError, ValueResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// A dotted path naming a nested field, such as `"address.city"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    /// Creates a single-segment path from a field name.
    pub fn new(field: impl Into<String>) -> Self {
        Self(field.into())
    }

    /// Parses a dotted path, rejecting empty paths and empty segments.
    pub fn parse(path: &str) -> ValueResult<Self> {
        if path.is_empty() {
            return Err(ValueError::EmptyPath);
        }
        if path.split('.').any(str::is_empty) {
            return Err(ValueError::invalid_path(path));
        }
        Ok(Self(path.to_string()))
    }

    /// Returns the path extended by one field.
    pub fn child(&self, field: &str) -> Self {
        Self(format!("{}.{}", self.0, field))
    }

    /// Returns the individual field names of this path.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Returns the dotted form of this path.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FieldPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldPath {
    fn from(field: &str) -> Self {
        Self::new(field)
    }
}

/// The payload of a partial update: dotted field path to new value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch {
    entries: BTreeMap<FieldPath, Value>,
}

impl Patch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a patch that writes every top-level field of `value`.
    ///
    /// This is the default update policy: the whole document is sent, one
    /// entry per top-level field.
    pub fn full(value: &Value) -> ValueResult<Self> {
        let fields = value
            .as_map()
            .ok_or_else(|| ValueError::not_a_map(value.kind()))?;
        Ok(fields
            .iter()
            .map(|(k, v)| (FieldPath::new(k.as_str()), v.clone()))
            .collect())
    }

    /// Sets the value written at `path`, returning any previous entry.
    pub fn insert(&mut self, path: impl Into<FieldPath>, value: Value) -> Option<Value> {
        self.entries.insert(path.into(), value)
    }

    /// Returns the value written at `path`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path)
    }

    /// Removes the entry at `path`.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.entries.remove(path)
    }

    /// Returns true if the patch writes `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the patch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in path order.
    pub fn iter(&self) -> btree_map::Iter<'_, FieldPath, Value> {
        self.entries.iter()
    }

    /// Merges the patch into `target`.
    ///
    /// Intermediate maps are created as needed; a non-map value standing in
    /// the way of a nested path is replaced by a map.
    pub fn apply_to(&self, target: &mut Value) {
        for (path, value) in &self.entries {
            let segments: Vec<&str> = path.segments().collect();
            set_path(target, &segments, value.clone());
        }
    }

    /// Returns the patch as a flat map value keyed by dotted path.
    pub fn to_value(&self) -> Value {
        Value::map(
            self.entries
                .iter()
                .map(|(path, value)| (path.as_str(), value.clone())),
        )
    }
}

fn set_path(target: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if !target.is_map() {
        *target = Value::empty_map();
    }
    if let Value::Map(fields) = target {
        let slot = fields.entry((*first).to_string()).or_insert(Value::Null);
        set_path(slot, rest, value);
    }
}

impl FromIterator<(FieldPath, Value)> for Patch {
    fn from_iter<I: IntoIterator<Item = (FieldPath, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Patch {
    type Item = (FieldPath, Value);
    type IntoIter = btree_map::IntoIter<FieldPath, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Patch {
    type Item = (&'a FieldPath, &'a Value);
    type IntoIter = btree_map::Iter<'a, FieldPath, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Computes the changed leaf paths between two snapshots of a document.
///
/// For each field of `new` that is not deeply equal to the same field of
/// `old`: when both sides are maps the comparison recurses and the nested
/// paths are prefixed with the field name; otherwise the whole new value is
/// emitted at that field. Arrays are therefore replaced wholesale.
///
/// Fields present in `old` but missing from `new` are never emitted, since a
/// merge-by-path update cannot express removal.
pub fn diff(old: &Value, new: &Value) -> Patch {
    let mut patch = Patch::new();
    diff_into(old, new, None, &mut patch);
    patch
}

fn diff_into(old: &Value, new: &Value, prefix: Option<&FieldPath>, patch: &mut Patch) {
    let Some(new_fields) = new.as_map() else {
        return;
    };

    for (key, new_value) in new_fields {
        let old_value = old.get(key);
        if deep_equal_opt(old_value, Some(new_value)) {
            continue;
        }

        let path = match prefix {
            Some(prefix) => prefix.child(key),
            None => FieldPath::new(key.as_str()),
        };

        match old_value {
            Some(old_value @ Value::Map(_)) if new_value.is_map() => {
                diff_into(old_value, new_value, Some(&path), patch);
            }
            _ => {
                patch.insert(path, new_value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_recurses_into_nested_maps() {
        let old = Value::map([("a", Value::map([("b", 1.into()), ("c", 2.into())]))]);
        let new = Value::map([("a", Value::map([("b", 1.into()), ("c", 3.into())]))]);

        let patch = diff(&old, &new);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("a.c"), Some(&Value::Integer(3)));
    }

    #[test]
    fn diff_replaces_arrays_wholesale() {
        let old = Value::map([("a", 1.into())]);
        let new = Value::map([("a", Value::from(vec![1, 2]))]);

        let patch = diff(&old, &new);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("a"), Some(&Value::from(vec![1, 2])));

        let grown = Value::map([("a", Value::from(vec![1, 2, 3]))]);
        let patch = diff(&new, &grown);
        assert_eq!(patch.get("a"), Some(&Value::from(vec![1, 2, 3])));
    }

    #[test]
    fn diff_of_equal_values_is_empty() {
        let value = Value::map([
            ("a", Value::map([("b", Value::from(vec![1, 2]))])),
            ("c", "text".into()),
        ]);
        assert!(diff(&value, &value.clone()).is_empty());
    }

    #[test]
    fn diff_ignores_removed_fields() {
        let old = Value::map([("a", 1.into()), ("b", 2.into())]);
        let new = Value::map([("a", 1.into())]);
        assert!(diff(&old, &new).is_empty());
    }

    #[test]
    fn diff_emits_new_fields_and_type_changes() {
        let old = Value::map([("a", Value::map([("x", 1.into())]))]);
        let new = Value::map([("a", "flat".into()), ("b", Value::map([("y", 2.into())]))]);

        let patch = diff(&old, &new);
        assert_eq!(patch.get("a"), Some(&Value::from("flat")));
        assert_eq!(patch.get("b"), Some(&Value::map([("y", 2.into())])));
    }

    #[test]
    fn diff_against_non_map_emits_everything() {
        let new = Value::map([("a", 1.into()), ("b", 2.into())]);
        assert_eq!(diff(&Value::Null, &new).len(), 2);
        assert!(diff(&new, &Value::Null).is_empty());
    }

    #[test]
    fn full_patch_lists_top_level_fields() {
        let value = Value::map([("a", Value::map([("b", 1.into())])), ("c", 2.into())]);
        let patch = Patch::full(&value).unwrap();
        assert_eq!(patch.len(), 2);
        assert_eq!(patch.get("a"), Some(&Value::map([("b", 1.into())])));
        assert!(Patch::full(&Value::Integer(1)).is_err());
    }

    #[test]
    fn apply_merges_by_path() {
        let mut doc = Value::map([
            ("a", Value::map([("b", 1.into()), ("c", 2.into())])),
            ("keep", true.into()),
        ]);
        let mut patch = Patch::new();
        patch.insert("a.c", 3.into());
        patch.insert(FieldPath::new("x").child("y"), "new".into());

        patch.apply_to(&mut doc);

        assert_eq!(doc.pointer("a.b"), Some(&Value::Integer(1)));
        assert_eq!(doc.pointer("a.c"), Some(&Value::Integer(3)));
        assert_eq!(doc.pointer("x.y"), Some(&Value::from("new")));
        assert_eq!(doc.get("keep"), Some(&Value::Bool(true)));
    }

    #[test]
    fn applying_a_diff_reproduces_the_target() {
        let old = Value::map([
            ("a", Value::map([("b", 1.into()), ("c", Value::from(vec![1]))])),
            ("d", "x".into()),
        ]);
        let new = Value::map([
            ("a", Value::map([("b", 5.into()), ("c", Value::from(vec![1, 2]))])),
            ("d", "x".into()),
            ("e", Value::Null),
        ]);

        let mut patched = old.clone();
        diff(&old, &new).apply_to(&mut patched);
        assert_eq!(patched, new);
    }

    #[test]
    fn field_path_parsing() {
        assert_eq!(FieldPath::parse("a.b").unwrap().segments().count(), 2);
        assert_eq!(FieldPath::parse(""), Err(ValueError::EmptyPath));
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse(".a").is_err());
    }

    #[test]
    fn patch_serializes_as_flat_map() {
        let mut patch = Patch::new();
        patch.insert("a.c", 3.into());
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"a.c":3}"#);
        assert_eq!(patch.to_value().get("a.c"), Some(&Value::Integer(3)));
    }
}
