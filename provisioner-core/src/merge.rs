//! Recursive merge of nested JSON mappings
//!
//! Conflict policy: when both sides hold an object under the same key the
//! objects are merged recursively; for any other pairing the incoming value
//! replaces the existing one. Later writers win on leaf conflicts.

use serde_json::{Map, Value};

/// Merges `incoming` into `target` in place.
pub fn merge_maps(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        let Value::Object(nested) = value else {
            target.insert(key, value);
            continue;
        };
        if let Some(Value::Object(existing)) = target.get_mut(&key) {
            merge_maps(existing, nested);
            continue;
        }
        target.insert(key, Value::Object(nested));
    }
}

/// Merges `incoming` into `target`, replacing `target` unless both are objects.
pub fn merge_values(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(nested)) => merge_maps(existing, nested),
        (target, incoming) => *target = incoming,
    }
}
