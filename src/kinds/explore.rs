//! Explores

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::common::{FieldSelector, display_name, reject_sql_and_connector};
use super::{Analysis, KindError, ResourceSpec};
use crate::core::{ResourceKind, ResourceName};
use crate::node::Node;
use crate::utils::yaml::{self, YamlError};

#[derive(Debug, Default, Deserialize)]
struct ExploreYaml {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    metrics_view: Option<String>,
    #[serde(default)]
    dimensions: Option<Value>,
    #[serde(default)]
    measures: Option<Value>,
    #[serde(default)]
    theme: Option<String>,
    #[serde(default)]
    time_zones: Vec<String>,
    #[serde(default)]
    allow_custom_time_range: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExploreSpec {
    pub display_name: String,
    pub description: String,
    pub metrics_view: String,
    pub dimensions: FieldSelector,
    pub measures: FieldSelector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    pub time_zones: Vec<String>,
    pub allow_custom_time_range: bool,
    /// Emitted by a metrics view rather than declared in its own file
    pub defined_in_metrics_view: bool,
}

pub(super) fn validate_defaults(value: &Value) -> Result<(), YamlError> {
    yaml::decode::<ExploreYaml>(value).map(|_| ())
}

pub(super) fn analyze(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    reject_sql_and_connector(node, "explores")?;
    let raw: ExploreYaml = yaml::decode(config)?;

    let Some(metrics_view) = raw.metrics_view.clone().filter(|s| !s.is_empty()) else {
        return Err(KindError::invalid(r#"missing required property "metrics_view""#));
    };
    let mut refs = node.refs.clone();
    refs.push(ResourceName::new(ResourceKind::MetricsView, metrics_view.clone()));
    if let Some(theme) = &raw.theme {
        refs.push(ResourceName::new(ResourceKind::Theme, theme.clone()));
    }

    let spec = ExploreSpec {
        display_name: raw
            .display_name
            .or(raw.title)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| display_name(&node.name)),
        description: raw.description,
        metrics_view,
        dimensions: FieldSelector::parse(raw.dimensions.as_ref(), "dimensions")?,
        measures: FieldSelector::parse(raw.measures.as_ref(), "measures")?,
        theme: raw.theme,
        time_zones: raw.time_zones,
        allow_custom_time_range: raw.allow_custom_time_range.unwrap_or(true),
        defined_in_metrics_view: false,
    };
    Ok(Analysis::single(node, ResourceKind::Explore, refs, ResourceSpec::Explore(spec)))
}
