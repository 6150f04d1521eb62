//! Parsing of explicit `refs:` lists

use serde_yaml::Value;

use crate::core::{ResourceKind, ResourceName};

/// Parses one `refs:` entry.
///
/// Accepted forms are `name`, `kind/name` and `{type: kind, name: name}` (with
/// `kind` as an alias of `type`). Legacy kind names normalize to their modern
/// equivalent.
pub fn parse_ref(value: &Value) -> Result<ResourceName, String> {
    match value {
        Value::String(s) => parse_ref_string(s),
        Value::Mapping(map) => {
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| "ref is missing property 'name'".to_string())?;
            let kind = match map.get("type").or_else(|| map.get("kind")) {
                None | Some(Value::Null) => ResourceKind::Unspecified,
                Some(Value::String(s)) => {
                    ResourceKind::parse_optional(s).map_err(|e| e.to_string())?
                }
                Some(_) => return Err("ref property 'type' must be a string".to_string()),
            };
            Ok(ResourceName::new(kind, name.trim()))
        }
        _ => Err("ref must be a string or a map with 'type' and 'name'".to_string()),
    }
}

fn parse_ref_string(s: &str) -> Result<ResourceName, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("ref must not be empty".to_string());
    }
    match s.split_once('/') {
        Some((kind, name)) => {
            let kind = ResourceKind::parse_optional(kind).map_err(|e| e.to_string())?;
            if name.trim().is_empty() {
                return Err(format!("invalid ref {s:?}: missing name"));
            }
            Ok(ResourceName::new(kind, name.trim()))
        }
        None => Ok(ResourceName::new(ResourceKind::Unspecified, s)),
    }
}

/// Parses a whole `refs:` list, failing on the first invalid entry.
pub fn parse_refs(values: &[Value]) -> Result<Vec<ResourceName>, String> {
    values.iter().map(parse_ref).collect()
}
