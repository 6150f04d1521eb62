//! Fields shared by every resource YAML file

use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ParserOptions {
    #[serde(default)]
    pub templating: Option<bool>,
}

/// The kind-agnostic subset of a resource YAML file.
///
/// Unknown keys are left for the kind analyzers.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CommonYaml {
    #[serde(default)]
    pub version: u32,
    #[serde(rename = "type", default)]
    pub type_: Option<Value>,
    /// Deprecated spelling of `type`
    #[serde(default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub refs: Vec<Value>,
    #[serde(default)]
    pub parser: ParserOptions,
    #[serde(default)]
    pub connector: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub environment_overrides: BTreeMap<String, Value>,
    /// Deprecated spelling of `environment_overrides`
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    #[serde(default)]
    pub dev: Value,
    #[serde(default)]
    pub prod: Value,
}

impl CommonYaml {
    /// Returns the override block for `environment`, merging all spellings.
    ///
    /// `dev:`/`prod:` shorthands win over `environment_overrides`, which wins
    /// over the deprecated `env:` block.
    pub fn override_for(&self, environment: &str) -> Option<Value> {
        let shorthand = match environment {
            "dev" => Some(&self.dev),
            "prod" => Some(&self.prod),
            _ => None,
        }
        .filter(|v| !v.is_null());

        shorthand
            .or_else(|| self.environment_overrides.get(environment))
            .or_else(|| self.env.get(environment))
            .filter(|v| !v.is_null())
            .cloned()
    }

    /// The declared kind string, preferring `type` over the deprecated `kind`.
    pub fn declared_kind(&self) -> Option<&Value> {
        self.type_
            .as_ref()
            .filter(|v| !v.is_null())
            .or(self.kind.as_ref().filter(|v| !v.is_null()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(text: &str) -> CommonYaml {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_override_spellings() {
        let c = common("dev: {a: 1}\nenvironment_overrides: {dev: {a: 2}, prod: {a: 3}}\nenv: {staging: {a: 4}}");
        assert_eq!(c.override_for("dev").unwrap(), serde_yaml::from_str::<Value>("a: 1").unwrap());
        assert_eq!(c.override_for("prod").unwrap(), serde_yaml::from_str::<Value>("a: 3").unwrap());
        assert_eq!(c.override_for("staging").unwrap(), serde_yaml::from_str::<Value>("a: 4").unwrap());
        assert!(c.override_for("test").is_none());
    }

    #[test]
    fn test_declared_kind_prefers_type() {
        let c = common("type: model\nkind: metrics_view");
        assert_eq!(c.declared_kind().and_then(Value::as_str), Some("model"));
        let c = common("kind: metrics_view");
        assert_eq!(c.declared_kind().and_then(Value::as_str), Some("metrics_view"));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let c = common("type: model\nmaterialize: true\nparser: {templating: false}");
        assert_eq!(c.parser.templating, Some(false));
    }
}
