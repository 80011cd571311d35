//! Structural state diffing
//!
//! Walks two JSON documents and reports keys present only in the source
//! (`added`), keys present only in the target (`removed`), and leaves whose
//! values diverge (`modified`), with dotted paths for nesting and a flag for
//! JSON-type changes.

use serde_json::Value;
use std::collections::BTreeMap;

/// One diverging leaf
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldChange {
    /// Value on the source side
    pub before: Value,
    /// Value on the target side
    pub after: Value,
    /// The JSON type differs between the sides
    pub type_changed: bool,
}

/// Result of a structural walk
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct StateDiff {
    /// Present in the source, missing from the target
    pub added: BTreeMap<String, Value>,
    /// Present in the target, missing from the source
    pub removed: BTreeMap<String, Value>,
    /// Present on both sides with diverging values
    pub modified: BTreeMap<String, FieldChange>,
}

impl StateDiff {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.modified.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// JSON type name used for type-change tracking
pub(crate) fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structural diff of `source` against `target`
pub fn diff(source: &Value, target: &Value) -> StateDiff {
    let mut result = StateDiff::default();
    walk(source, target, "", &mut result);
    result
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn walk(source: &Value, target: &Value, prefix: &str, out: &mut StateDiff) {
    match (source, target) {
        (Value::Object(src), Value::Object(tgt)) => {
            for (key, src_value) in src {
                let path = join(prefix, key);
                match tgt.get(key) {
                    Some(tgt_value) => walk(src_value, tgt_value, &path, out),
                    None => {
                        out.added.insert(path, src_value.clone());
                    }
                }
            }
            for (key, tgt_value) in tgt {
                if !src.contains_key(key) {
                    out.removed.insert(join(prefix, key), tgt_value.clone());
                }
            }
        }
        _ if source != target => {
            out.modified.insert(
                prefix.to_string(),
                FieldChange {
                    before: source.clone(),
                    after: target.clone(),
                    type_changed: value_type(source) != value_type(target),
                },
            );
        }
        _ => {}
    }
}

/// Read the value at a dotted path
pub(crate) fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a value at a dotted path, creating intermediate objects
pub(crate) fn set_path(value: &mut Value, path: &str, new_value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = value;
    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = match current.as_object_mut() {
            Some(map) => map,
            None => return,
        };
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), new_value);
            return;
        }
        current = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}
