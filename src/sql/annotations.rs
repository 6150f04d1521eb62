//! SQL comment annotations
//!
//! A SQL file may configure its resource through line comments:
//!
//! ```sql
//! -- @kind: metrics_view
//! -- @materialize
//! -- @output.connector: clickhouse
//! SELECT ...
//! ```
//!
//! Values are parsed as YAML scalars; a key without a value means `true`.

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// Extracts `-- @key: value` annotations in file order; later keys win.
pub fn extract_annotations(sql: &str) -> BTreeMap<String, Value> {
    let mut annotations = BTreeMap::new();
    for line in sql.lines() {
        let Some(comment) = line.trim_start().strip_prefix("--") else {
            continue;
        };
        let Some(body) = comment.trim_start().strip_prefix('@') else {
            continue;
        };
        let (key, raw) = match body.split_once(':') {
            Some((key, raw)) => (key.trim(), raw.trim()),
            None => (body.trim(), ""),
        };
        if key.is_empty() || key.contains(char::is_whitespace) {
            continue;
        }
        annotations.insert(key.to_string(), parse_scalar(raw));
    }
    annotations
}

fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Bool(true);
    }
    match serde_yaml::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Null)) => value,
        _ => Value::String(raw.to_string()),
    }
}

/// Error raised when a dotted key conflicts with a non-map value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("annotation {key:?}: nesting incompatible with other keys")]
pub struct NestingError {
    pub key: String,
}

/// Expands dotted keys into nested maps: `{"a.b": v}` becomes `{a: {b: v}}`.
pub fn expand_dotted<'a, I>(entries: I) -> Result<Mapping, NestingError>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let mut root = Mapping::new();
    for (key, value) in entries {
        let segments: Vec<&str> = key.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            continue;
        };
        let mut current = &mut root;
        for segment in parents {
            let entry = current
                .entry(Value::String((*segment).to_string()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            let Value::Mapping(map) = entry else {
                return Err(NestingError { key: key.clone() });
            };
            current = map;
        }
        let leaf_key = Value::String((*last).to_string());
        if matches!(current.get(&leaf_key), Some(Value::Mapping(_))) {
            return Err(NestingError { key: key.clone() });
        }
        current.insert(leaf_key, value.clone());
    }
    Ok(root)
}
