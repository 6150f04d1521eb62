//! Template function bindings
//!
//! The same template functions exist in both modes, bound differently:
//!
//! | function     | static analysis                    | resolve                        |
//! |--------------|------------------------------------|--------------------------------|
//! | `ref`        | records a ref, renders its name    | renders the resolver's output  |
//! | `dependency` | records a ref, renders nothing     | renders nothing                |
//! | `lookup`     | records a ref, returns `{}`        | returns the lookup's output    |
//! | `configure`  | records config keys                | no-op                          |
//! | `dev`/`prod` | `false`                            | compares the environment       |

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tera::Tera;

use super::{LookupResolver, RefResolver, TemplateError};
use crate::core::{ResourceKind, ResourceName};

/// Call sites recorded during static analysis.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub refs: BTreeSet<ResourceName>,
    pub config: BTreeMap<String, Value>,
}

pub(crate) type SharedRecorder = Arc<Mutex<Recorder>>;

fn with_recorder<T>(recorder: &SharedRecorder, f: impl FnOnce(&mut Recorder) -> T) -> T {
    let mut guard = recorder.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

fn call_error(function: &str, message: impl Into<String>) -> tera::Error {
    tera::Error::msg(
        TemplateError::InvalidCall {
            function: function.to_string(),
            message: message.into(),
        }
        .to_string(),
    )
}

/// Parses the `kind`/`name` arguments shared by `ref`, `dependency` and `lookup`.
///
/// `ref(name="orders")` leaves the kind unspecified for later inference;
/// `ref(kind="metrics_view", name="orders")` names it explicitly. Legacy kind
/// names normalize to their modern equivalent.
pub(crate) fn parse_ref_args(
    function: &str,
    args: &HashMap<String, Value>,
) -> tera::Result<ResourceName> {
    let name = match args.get("name") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(_) => return Err(call_error(function, "'name' must be a non-empty string")),
        None => return Err(call_error(function, "missing required argument 'name'")),
    };
    let kind = match args.get("kind").or_else(|| args.get("type")) {
        None | Some(Value::Null) => ResourceKind::Unspecified,
        Some(Value::String(s)) => {
            ResourceKind::parse_optional(s).map_err(|e| call_error(function, e.to_string()))?
        }
        Some(_) => return Err(call_error(function, "'kind' must be a string")),
    };
    Ok(ResourceName::new(kind, name))
}

fn parse_configure_args(args: &HashMap<String, Value>) -> tera::Result<Vec<(String, Value)>> {
    if let Some(blob) = args.get("yaml") {
        let Value::String(blob) = blob else {
            return Err(call_error("configure", "'yaml' must be a string"));
        };
        let parsed: serde_yaml::Value = serde_yaml::from_str(blob)
            .map_err(|e| call_error("configure", format!("invalid YAML: {e}")))?;
        let json = serde_json::to_value(&parsed)
            .map_err(|e| call_error("configure", format!("invalid YAML: {e}")))?;
        return match json {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(Vec::new()),
            _ => Err(call_error("configure", "YAML must be a mapping")),
        };
    }

    match (args.get("key"), args.get("value")) {
        (Some(Value::String(key)), Some(value)) => Ok(vec![(key.clone(), value.clone())]),
        (Some(_), Some(_)) => Err(call_error("configure", "'key' must be a string")),
        _ => Err(call_error(
            "configure",
            "expected either 'yaml' or both 'key' and 'value'",
        )),
    }
}

/// Registers the recording bindings used for static analysis.
pub(crate) fn register_static(tera: &mut Tera, recorder: &SharedRecorder) {
    let rec = Arc::clone(recorder);
    tera.register_function("ref", move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let name = parse_ref_args("ref", args)?;
        let placeholder = name.name.clone();
        with_recorder(&rec, |r| r.refs.insert(name));
        Ok(Value::String(placeholder))
    });

    let rec = Arc::clone(recorder);
    tera.register_function("dependency", move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let name = parse_ref_args("dependency", args)?;
        with_recorder(&rec, |r| r.refs.insert(name));
        Ok(Value::String(String::new()))
    });

    let rec = Arc::clone(recorder);
    tera.register_function("lookup", move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let name = parse_ref_args("lookup", args)?;
        with_recorder(&rec, |r| r.refs.insert(name));
        Ok(Value::Object(Map::new()))
    });

    let rec = Arc::clone(recorder);
    tera.register_function("configure", move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let pairs = parse_configure_args(args)?;
        with_recorder(&rec, |r| r.config.extend(pairs));
        Ok(Value::String(String::new()))
    });

    tera.register_function("dev", |_: &HashMap<String, Value>| -> tera::Result<Value> {
        Ok(Value::Bool(false))
    });
    tera.register_function("prod", |_: &HashMap<String, Value>| -> tera::Result<Value> {
        Ok(Value::Bool(false))
    });
}

/// Registers the real bindings used when resolving a template.
pub(crate) fn register_resolve(
    tera: &mut Tera,
    environment: &str,
    resolver: Option<RefResolver>,
    lookup: Option<LookupResolver>,
) {
    tera.register_function("ref", move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let name = parse_ref_args("ref", args)?;
        match &resolver {
            Some(resolve) => resolve(&name).map(Value::String).map_err(tera::Error::msg),
            None => Ok(Value::String(name.name)),
        }
    });

    tera.register_function("dependency", |args: &HashMap<String, Value>| -> tera::Result<Value> {
        parse_ref_args("dependency", args)?;
        Ok(Value::String(String::new()))
    });

    tera.register_function("lookup", move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let name = parse_ref_args("lookup", args)?;
        match &lookup {
            Some(lookup) => lookup(&name).map_err(tera::Error::msg),
            None => Err(tera::Error::msg(format!(
                "lookup of {name} is not available in this context"
            ))),
        }
    });

    tera.register_function("configure", |args: &HashMap<String, Value>| -> tera::Result<Value> {
        parse_configure_args(args)?;
        Ok(Value::String(String::new()))
    });

    let is_dev = environment == "dev";
    let is_prod = environment == "prod";
    tera.register_function("dev", move |_: &HashMap<String, Value>| -> tera::Result<Value> {
        Ok(Value::Bool(is_dev))
    });
    tera.register_function("prod", move |_: &HashMap<String, Value>| -> tera::Result<Value> {
        Ok(Value::Bool(is_prod))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> HashMap<String, Value> {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        }
    }

    #[test]
    fn test_parse_ref_args_forms() {
        let implicit = parse_ref_args("ref", &args(json!({"name": "orders"}))).unwrap();
        assert_eq!(implicit.kind, ResourceKind::Unspecified);

        let explicit =
            parse_ref_args("ref", &args(json!({"kind": "metrics_view", "name": "mv"}))).unwrap();
        assert_eq!(explicit, ResourceName::new(ResourceKind::MetricsView, "mv"));

        let legacy = parse_ref_args("ref", &args(json!({"kind": "source", "name": "s"}))).unwrap();
        assert_eq!(legacy.kind, ResourceKind::Model);
    }

    #[test]
    fn test_parse_ref_args_errors() {
        assert!(parse_ref_args("ref", &args(json!({}))).is_err());
        assert!(parse_ref_args("ref", &args(json!({"name": 3}))).is_err());
        assert!(parse_ref_args("ref", &args(json!({"kind": "nope", "name": "x"}))).is_err());
    }

    #[test]
    fn test_parse_configure_args() {
        let pairs = parse_configure_args(&args(json!({"key": "materialize", "value": true})))
            .unwrap();
        assert_eq!(pairs, vec![("materialize".to_string(), json!(true))]);

        let pairs =
            parse_configure_args(&args(json!({"yaml": "output:\n  connector: clickhouse\n"})))
                .unwrap();
        assert_eq!(pairs, vec![("output".to_string(), json!({"connector": "clickhouse"}))]);

        assert!(parse_configure_args(&args(json!({"yaml": "- a"}))).is_err());
        assert!(parse_configure_args(&args(json!({"key": "x"}))).is_err());
    }
}
