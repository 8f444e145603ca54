//! Benchmark utilities.

use mirrorsync_value::{Patch, Value};

/// Builds a document with `width` fields per level, nested `depth` levels.
pub fn nested_document(depth: usize, width: usize) -> Value {
    if depth == 0 {
        return Value::from("leaf");
    }
    Value::map((0..width).map(|i| (format!("key_{i}"), nested_document(depth - 1, width))))
}

/// Builds a flat document with `fields` integer fields.
pub fn flat_document(fields: usize) -> Value {
    Value::map((0..fields).map(|i| (format!("field_{i}"), Value::Integer(i as i64))))
}

/// Returns `document` with `changes` of its top-level fields overwritten.
pub fn edited(document: &Value, changes: usize) -> Value {
    let mut edited = document.clone();
    let patch: Patch = document
        .as_map()
        .into_iter()
        .flat_map(|fields| fields.keys())
        .take(changes)
        .map(|key| (key.as_str().into(), Value::from("changed")))
        .collect();
    patch.apply_to(&mut edited);
    edited
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_value::diff;

    #[test]
    fn edited_changes_the_requested_fields() {
        let doc = flat_document(10);
        let changed = edited(&doc, 3);
        assert_eq!(diff(&doc, &changed).len(), 3);
    }

    #[test]
    fn nested_document_has_width_fields() {
        let doc = nested_document(2, 4);
        assert_eq!(doc.as_map().map(|m| m.len()), Some(4));
    }
}
