//! Node builder
//!
//! A *stem* is a path without its extension: `/models/orders` groups
//! `/models/orders.yaml` and `/models/orders.sql`. The node builder merges a
//! stem's files into one kind-agnostic [`Node`]:
//!
//! 1. The YAML file (if any) is parsed and its common fields decoded.
//! 2. An override block for the active environment is applied on top.
//! 3. SQL comes from the companion `.sql` file or an inline `sql:` key, never both.
//! 4. Templated SQL is statically analyzed for refs and `configure` calls, and
//!    `-- @key: value` comments are collected; dotted keys become nested maps.
//! 5. Annotations may override `type`/`kind`, `name` and `connector`.
//! 6. Names default to the file's base name and get the namespace prefix.
//! 7. Kinds not declared are inferred from the directory.
//! 8. Resources without a connector get the default OLAP connector.
//!
//! Failures abort only the stem being built.

mod common;
mod refs;

pub use refs::{parse_ref, parse_refs};

use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::trace;

use crate::core::{ErrorKind, ParseError, ResourceKind, ResourceName};
use crate::sql::{expand_dotted, extract_annotations};
use crate::templating::analyze_template;
use crate::utils::yaml::{self, YamlError};
use common::CommonYaml;

/// A node could not be built; attributed to one of the stem's files.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NodeError {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<usize>,
}

impl NodeError {
    fn new(path: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            kind,
            message: message.into(),
            line: None,
        }
    }

    fn yaml(path: &str, err: YamlError) -> Self {
        Self {
            path: path.to_string(),
            kind: ErrorKind::Decode,
            message: err.message,
            line: err.line,
        }
    }
}

impl From<NodeError> for ParseError {
    fn from(err: NodeError) -> Self {
        ParseError::new(err.path, err.kind, err.message).with_line(err.line)
    }
}

/// Files and settings for one stem.
#[derive(Debug, Clone, Default)]
pub struct NodeInput<'a> {
    pub yaml_path: Option<&'a str>,
    pub yaml_text: Option<&'a str>,
    pub sql_path: Option<&'a str>,
    pub sql_text: Option<&'a str>,
    pub environment: &'a str,
    pub default_connector: &'a str,
}

/// The kind-agnostic form of one stem.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub version: u32,
    pub kind: ResourceKind,
    /// Declared as a legacy source (in `/sources` or with `type: source`)
    pub defined_as_source: bool,
    pub name: String,
    /// `true` when the name was declared rather than derived from the path
    pub explicit_name: bool,
    /// Refs from the `refs:` list and from template calls; sorted, unique
    pub refs: Vec<ResourceName>,
    /// All files contributing to the node, sorted
    pub paths: Vec<String>,
    pub yaml: Option<Value>,
    pub yaml_override: Option<Value>,
    pub yaml_raw: Option<String>,
    pub yaml_path: Option<String>,
    pub connector: String,
    pub connector_inferred: bool,
    pub sql: String,
    pub sql_path: Option<String>,
    /// Template `configure` values and comment annotations, dotted keys expanded
    pub sql_annotations: Mapping,
    pub sql_uses_templating: bool,
    /// A `type:` value under `/sources` that is not a kind; legacy spelling of the connector
    pub legacy_type: Option<String>,
}

impl Node {
    /// The path errors about this node are reported against.
    pub fn primary_path(&self) -> &str {
        self.yaml_path
            .as_deref()
            .or(self.sql_path.as_deref())
            .or(self.paths.first().map(String::as_str))
            .unwrap_or("")
    }

    /// The effective configuration: defaults, then the YAML file, then the
    /// environment override, then SQL annotations.
    pub fn layered(&self, defaults: Option<&Value>) -> Value {
        let annotations = Value::Mapping(self.sql_annotations.clone());
        let layers = [
            defaults,
            self.yaml.as_ref(),
            self.yaml_override.as_ref(),
            Some(&annotations),
        ];
        yaml::layer(layers.into_iter().flatten())
    }
}

/// Builds the node for one stem.
pub fn build_node(input: &NodeInput<'_>) -> Result<Node, NodeError> {
    let mut paths: Vec<String> = input
        .yaml_path
        .into_iter()
        .chain(input.sql_path)
        .map(str::to_string)
        .collect();
    paths.sort();
    let primary = input.yaml_path.or(input.sql_path).unwrap_or_default();

    // 1-2: common YAML fields and environment override
    let mut common = CommonYaml::default();
    let mut tree = None;
    let mut yaml_override = None;
    if let (Some(path), Some(text)) = (input.yaml_path, input.yaml_text) {
        let parsed = yaml::parse(text).map_err(|e| NodeError::yaml(path, e))?;
        if !parsed.is_null() {
            if !parsed.is_mapping() {
                return Err(NodeError::new(
                    path,
                    ErrorKind::Decode,
                    "YAML file must contain a mapping",
                ));
            }
            common = serde_yaml::from_str(text).map_err(|e| NodeError::yaml(path, e.into()))?;
            if let Some(over) = common.override_for(input.environment) {
                if !over.is_mapping() {
                    return Err(NodeError::new(
                        path,
                        ErrorKind::Decode,
                        format!(
                            "invalid override for environment {:?}: must be a map",
                            input.environment
                        ),
                    ));
                }
                let mut merged = parsed.clone();
                yaml::merge(&mut merged, &over);
                common = yaml::decode(&merged).map_err(|e| NodeError::yaml(path, e))?;
                yaml_override = Some(over);
            }
            tree = Some(parsed);
        }
    }

    // 3: SQL source
    let (sql, sql_path) = match (input.sql_text, common.sql.take()) {
        (Some(_), Some(_)) => {
            return Err(NodeError::new(
                input.sql_path.unwrap_or(primary),
                ErrorKind::Decode,
                "SQL provided using both a YAML key and a companion file",
            ));
        }
        (Some(text), None) => (text.to_string(), input.sql_path.map(str::to_string)),
        (None, Some(inline)) => (inline, input.yaml_path.map(str::to_string)),
        (None, None) => (String::new(), None),
    };
    let sql_error_path = sql_path.clone().unwrap_or_else(|| primary.to_string());

    // 4: template analysis and annotations
    let mut refs: BTreeSet<ResourceName> = BTreeSet::new();
    let mut flat = std::collections::BTreeMap::new();
    let mut sql_uses_templating = false;
    let templating_enabled = common.parser.templating.unwrap_or(true);
    if templating_enabled && !sql.trim().is_empty() {
        let meta = analyze_template(&sql).map_err(|e| NodeError {
            path: sql_error_path.clone(),
            kind: ErrorKind::Template,
            message: e.to_string(),
            line: e.line(),
        })?;
        sql_uses_templating = meta.uses_templating;
        refs.extend(meta.refs);
        for (key, value) in meta.config {
            let value = serde_yaml::to_value(&value).map_err(|e| {
                NodeError::new(&sql_error_path, ErrorKind::Template, e.to_string())
            })?;
            flat.insert(key, value);
        }
    }
    if !sql.is_empty() {
        flat.extend(extract_annotations(&sql));
    }
    let sql_annotations = expand_dotted(&flat)
        .map_err(|e| NodeError::new(&sql_error_path, ErrorKind::Decode, e.to_string()))?;

    // 5: annotation overrides
    let mut declared_kind = common.declared_kind().cloned();
    let mut name = common.name.clone().filter(|n| !n.trim().is_empty());
    let mut connector = common.connector.clone().filter(|c| !c.trim().is_empty());
    for key in ["type", "kind"] {
        if let Some(value) = sql_annotations.get(key) {
            declared_kind = Some(value.clone());
        }
    }
    if let Some(value) = sql_annotations.get("name") {
        name = Some(annotation_string(value, "name", &sql_error_path)?);
    }
    if let Some(value) = sql_annotations.get("connector") {
        connector = Some(annotation_string(value, "connector", &sql_error_path)?);
    }

    // 6: name
    let explicit_name = name.is_some();
    let mut name = match name {
        Some(name) => name.trim().to_string(),
        None => base_name(input.yaml_path.or(input.sql_path).unwrap_or_default()),
    };
    if let Some(namespace) = common.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        name = format!("{namespace}:{name}");
    }

    // 7: kind
    let mut legacy_type = None;
    let (mut kind, mut defined_as_source) = match &declared_kind {
        None => (ResourceKind::Unspecified, false),
        Some(Value::String(s)) => match ResourceKind::parse_optional(s) {
            Ok(kind) => (kind, ResourceKind::is_legacy_source(s)),
            // Sources once used `type` for the connector
            Err(_) if primary.starts_with("/sources/") => {
                legacy_type = Some(s.clone());
                (ResourceKind::Unspecified, false)
            }
            Err(e) => {
                return Err(NodeError::new(primary, ErrorKind::Inference, e.to_string()));
            }
        },
        Some(other) => {
            return Err(NodeError::new(
                primary,
                ErrorKind::Decode,
                format!(
                    "invalid type {} for property 'type'",
                    yaml_type_name(other)
                ),
            ));
        }
    };
    if kind == ResourceKind::Unspecified {
        (kind, defined_as_source) = infer_kind(input.yaml_path, input.sql_path).ok_or_else(|| {
            NodeError::new(
                primary,
                ErrorKind::Inference,
                "resource type not specified and could not be inferred from context",
            )
        })?;
    }

    // 8: connector
    let (connector, connector_inferred) = match connector {
        Some(c) => (c.trim().to_string(), false),
        None => (input.default_connector.to_string(), true),
    };

    // Explicit refs
    let explicit = parse_refs(&common.refs)
        .map_err(|e| NodeError::new(primary, ErrorKind::Decode, format!("invalid refs: {e}")))?;
    refs.extend(explicit);

    trace!(path = primary, %kind, name = %name, refs = refs.len(), "Built node");

    Ok(Node {
        version: common.version,
        kind,
        defined_as_source,
        name,
        explicit_name,
        refs: refs.into_iter().collect(),
        paths,
        yaml: tree,
        yaml_override,
        yaml_raw: input.yaml_text.map(str::to_string),
        yaml_path: input.yaml_path.map(str::to_string),
        connector,
        connector_inferred,
        sql,
        sql_path,
        sql_annotations,
        sql_uses_templating,
        legacy_type,
    })
}

fn annotation_string(value: &Value, key: &str, path: &str) -> Result<String, NodeError> {
    yaml::scalar_to_string(value)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            NodeError::new(
                path,
                ErrorKind::Decode,
                format!("invalid type {} for property '{key}'", yaml_type_name(value)),
            )
        })
}

fn yaml_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Returns the file name of `path` without its extension.
pub fn base_name(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file.to_string(),
    }
}

/// Infers the kind from directory conventions; `bool` marks legacy sources.
fn infer_kind(yaml_path: Option<&str>, sql_path: Option<&str>) -> Option<(ResourceKind, bool)> {
    let path = yaml_path.or(sql_path)?;
    if path.starts_with("/sources/") {
        return Some((ResourceKind::Model, true));
    }
    if path.starts_with("/models/") {
        return Some((ResourceKind::Model, false));
    }
    if path.starts_with("/dashboards/") || path.starts_with("/metrics/") {
        return Some((ResourceKind::MetricsView, false));
    }
    if path.starts_with("/connectors/") {
        return Some((ResourceKind::Connector, false));
    }
    if path == "/init.sql" {
        return Some((ResourceKind::Migration, false));
    }
    if sql_path.is_some() {
        return Some((ResourceKind::Model, false));
    }
    None
}
