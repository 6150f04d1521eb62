//! Project configuration (`rill.yaml`)
//!
//! Every project has one configuration file at its root. It declares display
//! metadata, the default OLAP connector, connectors with defaults, project
//! variables, per-kind default YAML for resources, feature flags and path
//! settings.
//!
//! # Environment overrides
//!
//! Top-level keys may be overridden per environment. Three spellings are
//! accepted and normalized into one override table keyed by environment name:
//!
//! ```yaml
//! environment_overrides:
//!   prod:
//!     olap_connector: clickhouse
//! dev:               # shorthand for environment_overrides.dev
//!   env:
//!     limit: 10
//! env:
//!   limit: 1000      # scalar entries are variables
//!   prod:            # legacy: map entries named dev/prod are overrides
//!     ai_connector: openai
//! ```
//!
//! The override for the active environment is overlaid before the file is
//! decoded, so every field reflects it.

use heck::ToSnakeCase;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

use crate::core::ResourceKind;
use crate::kinds;
use crate::templating::analyze_template;
use crate::utils::yaml::{self, YamlError};

/// Paths at which the project configuration may live, in lookup order.
pub const PROJECT_CONFIG_PATHS: [&str; 2] = ["/rill.yaml", "/rill.yml"];

const RESERVED_CONNECTOR_NAMES: [&str; 3] = ["admin", "repo", "metastore"];

/// Errors raised while loading the project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectError {
    #[error("rill.yaml not found")]
    NotFound,

    #[error(transparent)]
    Yaml(#[from] YamlError),

    #[error("{0}")]
    Invalid(String),
}

impl ProjectError {
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            ProjectError::Yaml(e) => e.line,
            _ => None,
        }
    }
}

/// A connector declared in `rill.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorDef {
    /// Driver name, e.g. `duckdb` or `s3`
    pub driver: String,
    pub name: String,
    pub defaults: Mapping,
}

/// A project variable with its default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDef {
    pub name: String,
    pub default: String,
}

/// A mock user for testing security policies locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockUser {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

/// Parsed project configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProjectConfig {
    pub display_name: String,
    pub description: String,
    pub ai_instructions: String,
    pub olap_connector: String,
    pub ai_connector: String,
    pub connectors: Vec<ConnectorDef>,
    /// Sorted by name
    pub variables: Vec<VariableDef>,
    /// Default YAML per kind; legacy sources have their own table
    pub defaults: BTreeMap<ResourceKind, Value>,
    pub source_defaults: Option<Value>,
    /// Feature name (snake_case) to template string
    pub feature_flags: BTreeMap<String, String>,
    pub public_paths: Vec<String>,
    pub ignore_paths: Vec<String>,
    pub mock_users: Vec<MockUser>,
}

impl ProjectConfig {
    /// Default YAML for a resource kind, if the project declares any.
    pub fn defaults_for(&self, kind: ResourceKind, defined_as_source: bool) -> Option<&Value> {
        if defined_as_source {
            return self.source_defaults.as_ref();
        }
        self.defaults.get(&kind)
    }

    /// Looks up a declared connector by name.
    pub fn connector(&self, name: &str) -> Option<&ConnectorDef> {
        self.connectors.iter().find(|c| c.name == name)
    }

    /// Project variables as a name → default map.
    pub fn variable_map(&self) -> BTreeMap<String, String> {
        self.variables
            .iter()
            .map(|v| (v.name.clone(), v.default.clone()))
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConnector {
    #[serde(rename = "type", default)]
    driver: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    defaults: Option<Mapping>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProjectConfig {
    // Accepted for compatibility, never consumed
    #[serde(default)]
    #[allow(dead_code)]
    compiler: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    rill_version: Option<Value>,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    ai_instructions: String,
    #[serde(default)]
    ai_connector: String,
    #[serde(default)]
    olap_connector: String,
    #[serde(default)]
    connectors: Vec<RawConnector>,
    #[serde(default)]
    env: BTreeMap<String, Value>,
    #[serde(default)]
    vars: BTreeMap<String, String>,
    #[serde(default)]
    environment_overrides: BTreeMap<String, Value>,
    #[serde(default)]
    dev: Value,
    #[serde(default)]
    prod: Value,
    #[serde(default)]
    sources: Value,
    #[serde(default)]
    models: Value,
    #[serde(default)]
    metrics_views: Value,
    #[serde(default)]
    dashboards: Value,
    #[serde(default)]
    explores: Value,
    #[serde(default)]
    canvases: Value,
    #[serde(default)]
    apis: Value,
    #[serde(default)]
    migrations: Value,
    #[serde(default)]
    features: Value,
    #[serde(default)]
    public_paths: Vec<String>,
    #[serde(default)]
    ignore_paths: Vec<String>,
    #[serde(default)]
    mock_users: Vec<MockUser>,
}

impl RawProjectConfig {
    /// Collects override blocks from all three spellings.
    fn overrides(&self) -> Result<BTreeMap<String, Value>, ProjectError> {
        let mut overrides = self.environment_overrides.clone();
        for (key, value) in &self.env {
            if yaml::scalar_to_string(value).is_some() {
                continue;
            }
            if key == "dev" || key == "prod" {
                overrides.insert(key.clone(), value.clone());
                continue;
            }
            return Err(ProjectError::Invalid(
                r#"invalid property "env": must be a map of strings"#.to_string(),
            ));
        }
        if !self.dev.is_null() {
            overrides.insert("dev".to_string(), self.dev.clone());
        }
        if !self.prod.is_null() {
            overrides.insert("prod".to_string(), self.prod.clone());
        }
        Ok(overrides)
    }
}

/// Parses `rill.yaml` contents for the given environment.
pub fn parse_project_config(text: &str, environment: &str) -> Result<ProjectConfig, ProjectError> {
    let mut tree = yaml::parse(text)?;
    // Decoding from text keeps line numbers in errors
    let mut raw: RawProjectConfig = if tree.is_null() {
        tree = Value::Mapping(Mapping::new());
        RawProjectConfig::default()
    } else {
        serde_yaml::from_str(text).map_err(YamlError::from)?
    };

    let overrides = raw.overrides()?;
    if let Some(over) = overrides.get(environment) {
        if !over.is_mapping() {
            return Err(ProjectError::Invalid(format!(
                "invalid override for environment {environment:?}: must be a map"
            )));
        }
        debug!(environment, "Applying rill.yaml environment override");
        yaml::merge(&mut tree, over);
        raw = yaml::decode(&tree)?;
    }

    let mut display_name = raw.display_name.clone();
    if display_name.is_empty() {
        display_name = if raw.title.is_empty() {
            raw.name.clone()
        } else {
            raw.title.clone()
        };
    }

    let mut variables = BTreeMap::new();
    for (name, value) in &raw.vars {
        validate_variable_name(name)?;
        variables.insert(name.clone(), value.clone());
    }
    for (name, value) in &raw.env {
        if let Some(value) = yaml::scalar_to_string(value) {
            validate_variable_name(name)?;
            variables.insert(name.clone(), value);
        }
    }

    let mut defaults = BTreeMap::new();
    let candidates = [
        ("models", ResourceKind::Model, &raw.models),
        ("metrics_views", ResourceKind::MetricsView, &raw.metrics_views),
        ("dashboards", ResourceKind::MetricsView, &raw.dashboards),
        ("explores", ResourceKind::Explore, &raw.explores),
        ("canvases", ResourceKind::Canvas, &raw.canvases),
        ("apis", ResourceKind::Api, &raw.apis),
        ("migrations", ResourceKind::Migration, &raw.migrations),
    ];
    for (key, kind, value) in candidates {
        if value.is_null() {
            continue;
        }
        kinds::validate_defaults(kind, value)
            .map_err(|e| ProjectError::Invalid(format!("invalid property {key:?}: {e}")))?;
        defaults.insert(kind, value.clone());
    }
    let source_defaults = if raw.sources.is_null() {
        None
    } else {
        kinds::validate_defaults(ResourceKind::Model, &raw.sources)
            .map_err(|e| ProjectError::Invalid(format!(r#"invalid property "sources": {e}"#)))?;
        Some(raw.sources.clone())
    };

    let feature_flags = parse_features(&raw.features)?;

    let mut connectors = Vec::with_capacity(raw.connectors.len());
    for c in &raw.connectors {
        if RESERVED_CONNECTOR_NAMES.contains(&c.name.as_str()) {
            return Err(ProjectError::Invalid(format!(
                "connector name {:?} is reserved",
                c.name
            )));
        }
        connectors.push(ConnectorDef {
            driver: c.driver.clone(),
            name: c.name.clone(),
            defaults: c.defaults.clone().unwrap_or_default(),
        });
    }

    let public_paths = if raw.public_paths.is_empty() {
        vec!["public".to_string()]
    } else {
        raw.public_paths.clone()
    };

    Ok(ProjectConfig {
        display_name,
        description: raw.description,
        ai_instructions: raw.ai_instructions,
        olap_connector: raw.olap_connector,
        ai_connector: raw.ai_connector,
        connectors,
        variables: variables
            .into_iter()
            .map(|(name, default)| VariableDef { name, default })
            .collect(),
        defaults,
        source_defaults,
        feature_flags,
        public_paths,
        ignore_paths: raw.ignore_paths,
        mock_users: raw.mock_users,
    })
}

fn parse_features(features: &Value) -> Result<BTreeMap<String, String>, ProjectError> {
    let flags: BTreeMap<String, String> = match features {
        Value::Null => BTreeMap::new(),
        Value::Mapping(map) => {
            let mut flags = BTreeMap::new();
            for (key, value) in map {
                let (Some(key), Some(value)) = (
                    yaml::scalar_to_string(key),
                    yaml::scalar_to_string(value),
                ) else {
                    return Err(ProjectError::Invalid(
                        r#"invalid property "features": values must be strings"#.to_string(),
                    ));
                };
                flags.insert(key, value);
            }
            flags
        }
        Value::Sequence(items) => {
            let mut flags = BTreeMap::new();
            for item in items {
                let Some(name) = item.as_str() else {
                    return Err(ProjectError::Invalid(
                        r#"invalid property "features": entries must be strings"#.to_string(),
                    ));
                };
                flags.insert(name.to_string(), "true".to_string());
            }
            flags
        }
        _ => {
            return Err(ProjectError::Invalid(
                r#"invalid property "features": must be a map or a sequence"#.to_string(),
            ));
        }
    };

    let mut snake = BTreeMap::new();
    for (name, value) in flags {
        analyze_template(&value).map_err(|e| {
            ProjectError::Invalid(format!(
                r#"invalid property "features": invalid value {value:?} for {name:?}: {e}"#
            ))
        })?;
        snake.insert(name.to_snake_case(), value);
    }
    Ok(snake)
}

fn validate_variable_name(name: &str) -> Result<(), ProjectError> {
    static NAME_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let valid = NAME_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name));
    if valid {
        Ok(())
    } else {
        Err(ProjectError::Invalid(format!(
            "invalid variable name {name:?}: must start with a letter or underscore and contain only letters, digits, '_', '.' or '-'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config = parse_project_config("", "dev").unwrap();
        assert_eq!(config.public_paths, vec!["public"]);
        assert!(config.connectors.is_empty());
        assert!(config.olap_connector.is_empty());
    }

    #[test]
    fn test_full_config() {
        let text = r#"
title: Legacy Title
description: Hello
olap_connector: duckdb
connectors:
  - type: s3
    name: s3
    defaults:
      region: us-east-1
vars:
  old: "1"
env:
  foo: bar
  limit: 10
models:
  materialize: true
dashboards:
  first_day_of_week: 7
features:
  - exports
  - chatBot
public_paths: [assets]
mock_users:
  - email: a@b.c
    admin: true
    tenant: x
"#;
        let config = parse_project_config(text, "dev").unwrap();
        assert_eq!(config.display_name, "Legacy Title");
        assert_eq!(config.connectors[0].driver, "s3");
        assert_eq!(config.connectors[0].defaults.len(), 1);
        let vars: Vec<_> = config
            .variables
            .iter()
            .map(|v| format!("{}={}", v.name, v.default))
            .collect();
        assert_eq!(vars, vec!["foo=bar", "limit=10", "old=1"]);
        assert!(config.defaults.contains_key(&ResourceKind::Model));
        assert!(config.defaults.contains_key(&ResourceKind::MetricsView));
        assert_eq!(config.feature_flags["chat_bot"], "true");
        assert_eq!(config.feature_flags["exports"], "true");
        assert_eq!(config.public_paths, vec!["assets"]);
        assert_eq!(config.mock_users[0].attributes["tenant"], Value::String("x".into()));
    }

    #[test]
    fn test_environment_overrides() {
        let text = r#"
olap_connector: duckdb
env:
  limit: 10
  prod:
    olap_connector: clickhouse
dev:
  env:
    limit: 5
environment_overrides:
  staging:
    description: staging!
"#;
        let dev = parse_project_config(text, "dev").unwrap();
        assert_eq!(dev.olap_connector, "duckdb");
        assert_eq!(dev.variable_map()["limit"], "5");

        let prod = parse_project_config(text, "prod").unwrap();
        assert_eq!(prod.olap_connector, "clickhouse");
        assert_eq!(prod.variable_map()["limit"], "10");

        let staging = parse_project_config(text, "staging").unwrap();
        assert_eq!(staging.description, "staging!");
    }

    #[test]
    fn test_invalid_env_map() {
        let err = parse_project_config("env:\n  nested:\n    a: 1\n", "dev").unwrap_err();
        assert_eq!(err.to_string(), r#"invalid property "env": must be a map of strings"#);
    }

    #[test]
    fn test_reserved_connector_name() {
        let err = parse_project_config("connectors:\n  - type: duckdb\n    name: admin\n", "dev")
            .unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_unknown_field_is_error() {
        let err = parse_project_config("olap_conector: duckdb\n", "dev").unwrap_err();
        assert!(matches!(err, ProjectError::Yaml(_)));
        assert!(err.line().is_some());
    }

    #[test]
    fn test_invalid_feature_template() {
        let err = parse_project_config("features:\n  x: \"{{ user.a \"\n", "dev").unwrap_err();
        assert!(err.to_string().contains(r#"invalid value"#));
    }

    #[test]
    fn test_feature_template_is_kept() {
        let config =
            parse_project_config("features:\n  themes: \"{{ user.admin }}\"\n", "dev").unwrap();
        assert_eq!(config.feature_flags["themes"], "{{ user.admin }}");
    }

    #[test]
    fn test_invalid_variable_name() {
        let err = parse_project_config("env:\n  \"1abc\": x\n", "dev").unwrap_err();
        assert!(err.to_string().contains("invalid variable name"));
    }
}
