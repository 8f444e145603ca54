//! Property-based test generators using proptest.
//!
//! Floats are drawn from a finite range: NaN never equals itself, which
//! would break reflexivity properties.

use mirrorsync_value::Value;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for field names. Names never contain the path separator.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,6}").expect("Invalid regex")
}

/// Strategy for document ids.
pub fn document_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e6..1.0e6f64).prop_map(Value::Float),
        "[ -~]{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

/// Strategy for arbitrary values, nested up to a few levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(field_name_strategy(), inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for document data: a map at the top level.
pub fn document_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(field_name_strategy(), value_strategy(), 0..6)
        .prop_map(Value::Map)
}

/// Strategy for a document and an edited version of it.
///
/// The edit overwrites, adds, or nests fields, but never deletes one.
pub fn edited_document_strategy() -> impl Strategy<Value = (Value, Value)> {
    (
        document_strategy(),
        prop::collection::btree_map(field_name_strategy(), value_strategy(), 0..4),
    )
        .prop_map(|(base, edits)| {
            let mut edited = base.clone();
            merge_fields(&mut edited, edits);
            (base, edited)
        })
}

fn merge_fields(target: &mut Value, edits: BTreeMap<String, Value>) {
    if let Some(fields) = target.as_map_mut() {
        for (key, value) in edits {
            let nests = matches!(fields.get(&key), Some(Value::Map(_)));
            match value {
                Value::Map(nested) if nests => {
                    if let Some(existing) = fields.get_mut(&key) {
                        merge_fields(existing, nested);
                    }
                }
                value => {
                    fields.insert(key, value);
                }
            }
        }
    }
}

/// Strategy for document paths of the form `collection/id`.
pub fn document_path_strategy() -> impl Strategy<Value = String> {
    (field_name_strategy(), document_id_strategy()).prop_map(|(c, id)| format!("{c}/{id}"))
}
