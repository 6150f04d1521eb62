//! Custom APIs

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::common::DataYaml;
use super::{Analysis, KindError, ResourceSpec};
use crate::core::ResourceKind;
use crate::node::Node;
use crate::utils::yaml::{self, YamlError};

#[derive(Debug, Default, Deserialize)]
struct ApiYaml {
    #[serde(flatten)]
    data: DataYaml,
    #[serde(default)]
    skip_nested_security: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiSpec {
    pub resolver: String,
    pub resolver_properties: Mapping,
    pub skip_nested_security: bool,
}

pub(super) fn validate_defaults(value: &Value) -> Result<(), YamlError> {
    yaml::decode::<ApiYaml>(value).map(|_| ())
}

pub(super) fn analyze(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    let mut raw: ApiYaml = yaml::decode(config)?;

    // A companion SQL file is the API's SQL resolver
    if !node.sql.trim().is_empty() {
        raw.data.sql = Some(node.sql.trim().to_string());
        if !node.connector_inferred {
            raw.data.connector = Some(node.connector.clone());
        }
    }
    if raw.data.is_empty() {
        return Err(KindError::invalid("APIs must define a resolver such as 'sql' or 'metrics_sql'"));
    }

    let resolver = raw.data.resolver()?;
    let mut refs = node.refs.clone();
    refs.extend(resolver.refs);
    let spec = ApiSpec {
        resolver: resolver.name,
        resolver_properties: resolver.properties,
        skip_nested_security: raw.skip_nested_security,
    };
    Ok(Analysis::single(node, ResourceKind::Api, refs, ResourceSpec::Api(spec)))
}
