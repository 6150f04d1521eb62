//! Migrations

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::{Analysis, KindError, ResourceSpec};
use crate::core::ResourceKind;
use crate::node::Node;
use crate::utils::yaml::{self, YamlError};

#[derive(Debug, Default, Deserialize)]
struct MigrationYaml {
    #[serde(default)]
    max_version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSpec {
    pub connector: String,
    pub sql: String,
    pub version: u32,
}

pub(super) fn validate_defaults(value: &Value) -> Result<(), YamlError> {
    yaml::decode::<MigrationYaml>(value).map(|_| ())
}

pub(super) fn analyze(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    let raw: MigrationYaml = yaml::decode(config)?;
    let sql = node.sql.trim();
    if sql.is_empty() {
        return Err(KindError::invalid("migrations must have SQL"));
    }
    let spec = MigrationSpec {
        connector: node.connector.clone(),
        sql: sql.to_string(),
        version: raw.max_version.unwrap_or(node.version),
    };
    Ok(Analysis::single(
        node,
        ResourceKind::Migration,
        node.refs.clone(),
        ResourceSpec::Migration(spec),
    ))
}
