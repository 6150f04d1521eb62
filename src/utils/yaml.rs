//! YAML tree helpers
//!
//! Resource configuration is assembled from several YAML layers (project
//! defaults, the file itself, environment overrides, SQL annotations). Layers
//! are combined with [`merge`]: mappings merge key by key, recursively; any
//! other value in the overlay replaces the base value.

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

/// Overlays `overlay` onto `base` in place.
///
/// ```rust
/// use rill_graph::utils::yaml::merge;
///
/// let mut base: serde_yaml::Value = serde_yaml::from_str("a: 1\nb: {x: 1, y: 2}").unwrap();
/// let overlay: serde_yaml::Value = serde_yaml::from_str("b: {y: 3}\nc: [1]").unwrap();
/// merge(&mut base, &overlay);
///
/// let expected: serde_yaml::Value =
///     serde_yaml::from_str("a: 1\nb: {x: 1, y: 3}\nc: [1]").unwrap();
/// assert_eq!(base, expected);
/// ```
pub fn merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Overlays a list of layers in order onto an empty mapping.
pub fn layer<'a>(layers: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut result = Value::Mapping(Mapping::new());
    for layer in layers {
        merge(&mut result, layer);
    }
    result
}

/// A YAML decode failure with its 1-based line, when known.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct YamlError {
    pub message: String,
    pub line: Option<usize>,
}

impl From<serde_yaml::Error> for YamlError {
    fn from(err: serde_yaml::Error) -> Self {
        Self {
            line: err.location().map(|loc| loc.line()),
            message: err.to_string(),
        }
    }
}

/// Parses YAML text into a generic tree; empty documents become `Null`.
pub fn parse(text: &str) -> Result<Value, YamlError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_yaml::from_str(text)?)
}

/// Decodes a typed value out of a tree.
pub fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, YamlError> {
    let value = match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other.clone(),
    };
    Ok(serde_yaml::from_value(value)?)
}

/// Returns the mapping entry for a string key.
pub fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_mapping()?.get(key)
}

/// Renders a scalar as the string a user would have typed.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
