//! Connector resources

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use super::common::remaining_properties;
use super::{Analysis, KindError, ResourceSpec};
use crate::core::ResourceKind;
use crate::node::Node;
use crate::utils::yaml;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorSpec {
    pub driver: String,
    pub properties: Mapping,
    /// Names of properties whose values are templates resolved at runtime
    pub templated_properties: Vec<String>,
    pub provision: bool,
    pub provision_args: Mapping,
}

pub(super) fn analyze(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    if !node.sql.trim().is_empty() {
        return Err(KindError::invalid("connectors cannot have SQL"));
    }
    if !node.connector_inferred {
        return Err(KindError::invalid(
            "connectors cannot have a connector; use \"driver\" to set the driver",
        ));
    }

    let driver = match yaml::get(config, "driver") {
        Some(Value::String(d)) if !d.trim().is_empty() => d.trim().to_string(),
        Some(_) => return Err(KindError::invalid(r#"invalid property "driver""#)),
        None => return Err(KindError::invalid(r#"missing required property "driver""#)),
    };

    let (provision, provision_args) = match yaml::get(config, "managed") {
        None | Some(Value::Null) => (false, Mapping::new()),
        Some(Value::Bool(b)) => (*b, Mapping::new()),
        Some(Value::Mapping(args)) => (true, args.clone()),
        Some(_) => return Err(KindError::invalid("failed to decode 'managed'")),
    };

    let properties = remaining_properties(config, &["driver", "managed"]);
    let mut templated_properties: Vec<String> = properties
        .iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?;
            let text = v.as_str()?;
            crate::templating::uses_templating(text).then(|| key.to_string())
        })
        .collect();
    templated_properties.sort();

    let spec = ConnectorSpec {
        driver,
        properties,
        templated_properties,
        provision,
        provision_args,
    };
    Ok(Analysis::single(
        node,
        ResourceKind::Connector,
        node.refs.clone(),
        ResourceSpec::Connector(spec),
    ))
}
