//! Property tests for deep equality and diffing.

use mirrorsync_testkit::prelude::*;
use mirrorsync_value::{deep_equal, diff, Value};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn equality_is_reflexive(value in value_strategy()) {
        prop_assert!(deep_equal(&value, &value.clone()));
    }

    #[test]
    fn equality_is_symmetric(a in value_strategy(), b in value_strategy()) {
        prop_assert_eq!(deep_equal(&a, &b), deep_equal(&b, &a));
    }

    #[test]
    fn diff_of_equal_documents_is_empty(doc in document_strategy()) {
        prop_assert!(diff(&doc, &doc.clone()).is_empty());
    }

    #[test]
    fn applying_diff_reproduces_edit((base, edited) in edited_document_strategy()) {
        let patch = diff(&base, &edited);
        let mut rebuilt = base.clone();
        patch.apply_to(&mut rebuilt);
        prop_assert!(deep_equal(&rebuilt, &edited), "patch {:?}", patch);
    }

    #[test]
    fn diff_only_names_fields_of_the_new_document(
        old in document_strategy(),
        new in document_strategy(),
    ) {
        let patch = diff(&old, &new);
        for (path, value) in &patch {
            let written = new.pointer(path.as_str());
            prop_assert_eq!(written, Some(value));
        }
    }

    #[test]
    fn diff_against_non_map_sends_everything(doc in document_strategy()) {
        let patch = diff(&Value::Null, &doc);
        prop_assert_eq!(patch.len(), doc.as_map().map_or(0, |m| m.len()));
    }
}

#[test]
fn diff_examples() {
    let old = Value::map([(
        "a",
        Value::map([("b", Value::from(1)), ("c", Value::from(2))]),
    )]);
    let new = Value::map([(
        "a",
        Value::map([("b", Value::from(1)), ("c", Value::from(3))]),
    )]);
    let patch = diff(&old, &new);
    assert_eq!(patch.len(), 1);
    assert_eq!(patch.get("a.c"), Some(&Value::from(3)));

    let old = Value::map([("a", Value::from(1))]);
    let new = Value::map([("a", Value::from(vec![1, 2]))]);
    let patch = diff(&old, &new);
    assert_eq!(patch.get("a"), Some(&Value::from(vec![1, 2])));
}

#[test]
fn removed_fields_are_not_expressed() {
    let old = Value::map([("a", Value::from(1)), ("b", Value::from(2))]);
    let new = Value::map([("a", Value::from(1))]);
    assert!(diff(&old, &new).is_empty());
}
