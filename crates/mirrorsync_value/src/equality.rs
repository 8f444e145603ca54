//! Deep structural equality.

use crate::value::Value;

/// Compare two values deeply.
///
/// Arrays are compared element by element in order. Maps are compared over
/// the union of both key sets, so a field present on only one side makes the
/// maps unequal. Primitives compare by value within the same kind: an
/// `Integer(1)` never equals a `Float(1.0)`, and `NaN` never equals itself.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Map(left), Value::Map(right)) => left
            .keys()
            .chain(right.keys())
            .all(|key| deep_equal_opt(left.get(key), right.get(key))),
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len() && left.iter().zip(right).all(|(l, r)| deep_equal(l, r))
        }
        (Value::Map(_) | Value::Array(_), _) | (_, Value::Map(_) | Value::Array(_)) => false,
        (Value::Null, Value::Null) => true,
        (Value::Bool(l), Value::Bool(r)) => l == r,
        (Value::Integer(l), Value::Integer(r)) => l == r,
        (Value::Float(l), Value::Float(r)) => l == r,
        (Value::Text(l), Value::Text(r)) => l == r,
        (Value::Bytes(l), Value::Bytes(r)) => l == r,
        _ => false,
    }
}

/// Compare two optional values deeply, treating `None` as an absent field.
///
/// Absence only equals absence; it is unequal to every present value,
/// including `Null`.
pub fn deep_equal_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => deep_equal(a, b),
        _ => false,
    }
}
