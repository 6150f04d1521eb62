//! Kind dispatcher and per-kind analyzers
//!
//! Every built [`Node`] is routed by its kind to an analyzer that validates the
//! kind-specific YAML and produces one or more [`ResourceDraft`]s. Most nodes
//! produce exactly one draft; metrics views may also emit an explore, and
//! canvases emit a component per inline component definition.
//!
//! Analyzers see the node's *layered* configuration: project defaults for the
//! kind, then the file's YAML, then the environment override, then SQL
//! annotations.
//!
//! # Examples
//!
//! ```rust,no_run
//! use rill_graph::kinds::{analyze, AnalyzeContext, StaticDrivers};
//! use rill_graph::node::{build_node, NodeInput};
//! use rill_graph::project::ProjectConfig;
//! use rill_graph::repo::MemoryRepo;
//!
//! let node = build_node(&NodeInput {
//!     sql_path: Some("/models/orders.sql"),
//!     sql_text: Some("SELECT * FROM raw_orders"),
//!     environment: "dev",
//!     default_connector: "duckdb",
//!     ..Default::default()
//! })?;
//!
//! let project = ProjectConfig::default();
//! let drivers = StaticDrivers::default();
//! let repo = MemoryRepo::new();
//! let ctx = AnalyzeContext {
//!     project: &project,
//!     drivers: &drivers,
//!     repo: &repo,
//!     olap_connector: "duckdb",
//! };
//! let analysis = analyze(&node, &ctx)?;
//! assert_eq!(analysis.drafts[0].name.name, "orders");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod api;
mod canvas;
mod common;
mod connector;
mod explore;
mod metrics_view;
mod migration;
mod model;
mod report;
mod theme;

pub use api::ApiSpec;
pub use canvas::{CanvasItem, CanvasRow, CanvasSpec, ComponentSpec};
pub use common::{FieldSelector, Notifier, Schedule, display_name};
pub use connector::ConnectorSpec;
pub use explore::ExploreSpec;
pub use metrics_view::{Dimension, Measure, MetricsViewSpec, SecurityPolicy};
pub use migration::MigrationSpec;
pub use model::{ChangeMode, ModelSpec};
pub use report::{AlertSpec, ReportSpec};
pub use theme::ThemeSpec;

use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::{ResourceKind, ResourceName};
use crate::node::Node;
use crate::project::ProjectConfig;
use crate::repo::{Repo, RepoError};
use crate::sql::SqlParseError;
use crate::templating::TemplateError;
use crate::utils::yaml::YamlError;

/// Errors raised by kind analyzers.
#[derive(Debug, Error)]
pub enum KindError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Decode(#[from] YamlError),

    /// SQL could not be parsed for ref inference; attributed to the SQL's file
    #[error("{source}")]
    Sql {
        path: String,
        #[source]
        source: SqlParseError,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl KindError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        KindError::Invalid(message.into())
    }

    /// The file the error belongs to, when it is not the node's primary path.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            KindError::Sql { path, .. } => Some(path),
            _ => None,
        }
    }

    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            KindError::Decode(e) => e.line,
            KindError::Sql { source, .. } => source.line,
            KindError::Template(e) => e.line(),
            _ => None,
        }
    }
}

/// Resolves connector names to driver names.
pub trait DriverRegistry {
    /// Returns the driver backing `connector`.
    fn driver_for_connector(&self, connector: &str) -> String;
}

/// A fixed connector-to-driver map; unknown names are their own driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticDrivers {
    drivers: BTreeMap<String, String>,
}

impl StaticDrivers {
    pub fn new(drivers: BTreeMap<String, String>) -> Self {
        Self { drivers }
    }

    pub fn insert(&mut self, connector: impl Into<String>, driver: impl Into<String>) {
        self.drivers.insert(connector.into(), driver.into());
    }
}

impl DriverRegistry for StaticDrivers {
    fn driver_for_connector(&self, connector: &str) -> String {
        self.drivers
            .get(connector)
            .cloned()
            .unwrap_or_else(|| connector.to_string())
    }
}

/// Everything an analyzer may consult besides the node itself.
pub struct AnalyzeContext<'a> {
    pub project: &'a ProjectConfig,
    pub drivers: &'a dyn DriverRegistry,
    pub repo: &'a dyn Repo,
    /// The effective default OLAP connector
    pub olap_connector: &'a str,
}

impl AnalyzeContext<'_> {
    fn driver(&self, connector: &str) -> String {
        self.drivers.driver_for_connector(connector)
    }
}

/// The typed body of a resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Model(ModelSpec),
    MetricsView(MetricsViewSpec),
    Explore(ExploreSpec),
    Migration(MigrationSpec),
    Report(ReportSpec),
    Alert(AlertSpec),
    Theme(ThemeSpec),
    Component(ComponentSpec),
    Canvas(CanvasSpec),
    Api(ApiSpec),
    Connector(ConnectorSpec),
}

/// A resource produced by an analyzer, before refs are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDraft {
    pub name: ResourceName,
    pub paths: Vec<String>,
    /// Refs as declared or inferred; unspecified kinds are resolved later
    pub refs: Vec<ResourceName>,
    pub spec: ResourceSpec,
    /// Emitted automatically; yields silently to a declared resource of the same name
    pub implicit: bool,
}

/// The result of analyzing one node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Analysis {
    pub drafts: Vec<ResourceDraft>,
    /// Local data files whose contents affect the drafts
    pub data_paths: Vec<String>,
    /// Names of other resources whose changes require re-analysis
    pub watched: Vec<String>,
}

impl Analysis {
    fn single(node: &Node, kind: ResourceKind, refs: Vec<ResourceName>, spec: ResourceSpec) -> Self {
        Self {
            drafts: vec![ResourceDraft {
                name: ResourceName::new(kind, node.name.clone()),
                paths: node.paths.clone(),
                refs,
                spec,
                implicit: false,
            }],
            ..Default::default()
        }
    }
}

/// Routes a node to its kind's analyzer.
///
/// # Panics
///
/// Panics if the node's kind is [`ResourceKind::Unspecified`]; the node builder
/// never produces such a node.
pub fn analyze(node: &Node, ctx: &AnalyzeContext<'_>) -> Result<Analysis, KindError> {
    let defaults = ctx.project.defaults_for(node.kind, node.defined_as_source);
    let config = node.layered(defaults);
    match node.kind {
        ResourceKind::Model => model::analyze(node, &config, ctx),
        ResourceKind::MetricsView => metrics_view::analyze(node, &config),
        ResourceKind::Explore => explore::analyze(node, &config),
        ResourceKind::Migration => migration::analyze(node, &config),
        ResourceKind::Report => report::analyze_report(node, &config),
        ResourceKind::Alert => report::analyze_alert(node, &config),
        ResourceKind::Theme => theme::analyze(node, &config),
        ResourceKind::Component => canvas::analyze_component(node, &config),
        ResourceKind::Canvas => canvas::analyze_canvas(node, &config),
        ResourceKind::Api => api::analyze(node, &config),
        ResourceKind::Connector => connector::analyze(node, &config),
        ResourceKind::Unspecified => unreachable!("node {} reached dispatch without a kind", node.name),
    }
}

/// Checks that `value` is valid as project-wide defaults for `kind`.
pub fn validate_defaults(kind: ResourceKind, value: &Value) -> Result<(), String> {
    if !value.is_mapping() {
        return Err("defaults must be a map".to_string());
    }
    let result = match kind {
        ResourceKind::Model => model::validate_defaults(value),
        ResourceKind::MetricsView => metrics_view::validate_defaults(value),
        ResourceKind::Explore => explore::validate_defaults(value),
        ResourceKind::Migration => migration::validate_defaults(value),
        ResourceKind::Canvas => canvas::validate_defaults(value),
        ResourceKind::Api => api::validate_defaults(value),
        _ => Ok(()),
    };
    result.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeInput, build_node};
    use crate::repo::MemoryRepo;

    pub(crate) fn analyze_files(
        yaml: Option<(&str, &str)>,
        sql: Option<(&str, &str)>,
    ) -> Result<Analysis, KindError> {
        let node = build_node(&NodeInput {
            yaml_path: yaml.map(|(p, _)| p),
            yaml_text: yaml.map(|(_, t)| t),
            sql_path: sql.map(|(p, _)| p),
            sql_text: sql.map(|(_, t)| t),
            environment: "dev",
            default_connector: "duckdb",
        })
        .unwrap();
        let project = ProjectConfig::default();
        let drivers = StaticDrivers::default();
        let repo = MemoryRepo::new();
        let ctx = AnalyzeContext {
            project: &project,
            drivers: &drivers,
            repo: &repo,
            olap_connector: "duckdb",
        };
        analyze(&node, &ctx)
    }

    #[test]
    fn test_static_drivers() {
        let mut drivers = StaticDrivers::default();
        drivers.insert("warehouse", "clickhouse");
        assert_eq!(drivers.driver_for_connector("warehouse"), "clickhouse");
        assert_eq!(drivers.driver_for_connector("duckdb"), "duckdb");
    }

    #[test]
    fn test_validate_defaults() {
        let value: Value = serde_yaml::from_str("first_day_of_week: 7").unwrap();
        assert!(validate_defaults(ResourceKind::MetricsView, &value).is_ok());

        let value: Value = serde_yaml::from_str("first_day_of_week: monday").unwrap();
        assert!(validate_defaults(ResourceKind::MetricsView, &value).is_err());

        let value: Value = serde_yaml::from_str("[1]").unwrap();
        assert_eq!(
            validate_defaults(ResourceKind::Model, &value).unwrap_err(),
            "defaults must be a map"
        );
    }

    #[test]
    fn test_dispatch_by_kind() {
        let analysis = analyze_files(Some(("/themes/t.yaml", "type: theme\ncolors:\n  primary: '#ff0000'")), None)
            .unwrap();
        assert_eq!(analysis.drafts[0].name, ResourceName::new(ResourceKind::Theme, "t"));
        assert!(matches!(analysis.drafts[0].spec, ResourceSpec::Theme(_)));
    }
}
