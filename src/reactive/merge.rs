//! Field-wise merge of JSON objects.

use serde_json::{Map, Value};

/// Overwrite fields of `target` with the fields of `source`.
///
/// Shallow: nested objects in `source` replace the target's field wholesale.
/// A non-object `source` (null, scalars, arrays) changes nothing. Returns
/// whether any field of `target` now holds a different value.
pub fn merge_fields(target: &mut Map<String, Value>, source: &Value) -> bool {
    let Value::Object(fields) = source else {
        return false;
    };

    let mut changed = false;
    for (name, value) in fields {
        if target.get(name) != Some(value) {
            target.insert(name.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
