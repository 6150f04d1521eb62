//! Themes

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::sync::OnceLock;

use super::common::reject_sql_and_connector;
use super::{Analysis, KindError, ResourceSpec};
use crate::core::ResourceKind;
use crate::node::Node;
use crate::utils::yaml;

#[derive(Debug, Default, Deserialize)]
struct ColorsYaml {
    #[serde(default)]
    primary: Option<String>,
    #[serde(default)]
    secondary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ThemeYaml {
    #[serde(default)]
    colors: ColorsYaml,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThemeSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
}

pub(super) fn analyze(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    reject_sql_and_connector(node, "themes")?;
    let raw: ThemeYaml = yaml::decode(config)?;

    for (property, color) in [
        ("primary", &raw.colors.primary),
        ("secondary", &raw.colors.secondary),
    ] {
        if let Some(color) = color {
            if !is_color(color) {
                return Err(KindError::invalid(format!(
                    "invalid color {color:?} for \"colors.{property}\""
                )));
            }
        }
    }

    let spec = ThemeSpec {
        primary_color: raw.colors.primary,
        secondary_color: raw.colors.secondary,
    };
    Ok(Analysis::single(node, ResourceKind::Theme, node.refs.clone(), ResourceSpec::Theme(spec)))
}

fn is_color(s: &str) -> bool {
    static COLOR_RE: OnceLock<Option<Regex>> = OnceLock::new();
    COLOR_RE
        .get_or_init(|| {
            Regex::new(
                r"^(#([0-9a-fA-F]{3}|[0-9a-fA-F]{4}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})|(rgb|rgba|hsl|hsla)\([^)]*\)|[a-zA-Z]+)$",
            )
            .ok()
        })
        .as_ref()
        .is_some_and(|re| re.is_match(s.trim()))
}
