//! Models (and legacy sources)

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::common::{ScheduleYaml, Schedule, parse_duration, parse_schedule, remaining_properties};
use super::{AnalyzeContext, Analysis, KindError, ResourceSpec};
use crate::core::{ResourceKind, ResourceName, normalize_path};
use crate::node::Node;
use crate::repo::is_glob;
use crate::sql::infer_table_refs;
use crate::utils::yaml::{self, YamlError};

const MODEL_KEYS: [&str; 9] = [
    "refresh",
    "timeout",
    "incremental",
    "change_mode",
    "output",
    "materialize",
    "defined_as_source",
    "stage",
    "state",
];

#[derive(Debug, Default, Deserialize)]
struct ModelYaml {
    #[serde(default)]
    refresh: Option<ScheduleYaml>,
    #[serde(default)]
    timeout: Option<Value>,
    #[serde(default)]
    incremental: bool,
    #[serde(default)]
    change_mode: Option<String>,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    materialize: Option<bool>,
    #[serde(default)]
    defined_as_source: bool,
    #[serde(default)]
    stage: Option<Mapping>,
}

/// How a model reacts to changes in its definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMode {
    #[default]
    Reset,
    Manual,
    Patch,
}

impl ChangeMode {
    fn parse(s: Option<&str>) -> Result<Self, KindError> {
        match s.map(str::trim) {
            None | Some("") | Some("reset") => Ok(ChangeMode::Reset),
            Some("manual") => Ok(ChangeMode::Manual),
            Some("patch") => Ok(ChangeMode::Patch),
            Some(other) => Err(KindError::invalid(format!(
                "unsupported change mode: {other:?} (supported values: reset, manual, patch)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSpec {
    pub input_connector: String,
    pub input_properties: Mapping,
    pub output_connector: String,
    pub output_properties: Mapping,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_connector: Option<String>,
    pub stage_properties: Mapping,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<Schedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    pub change_mode: ChangeMode,
    pub incremental: bool,
    pub defined_as_source: bool,
}

pub(super) fn validate_defaults(value: &Value) -> Result<(), YamlError> {
    yaml::decode::<ModelYaml>(value).map(|_| ())
}

pub(super) fn analyze(
    node: &Node,
    config: &Value,
    ctx: &AnalyzeContext<'_>,
) -> Result<Analysis, KindError> {
    let raw: ModelYaml = yaml::decode(config)?;

    let change_mode = ChangeMode::parse(raw.change_mode.as_deref())?;
    let refresh = parse_schedule(raw.refresh.as_ref(), true)?;
    let timeout_seconds = raw
        .timeout
        .as_ref()
        .map(|v| parse_duration(v).map_err(|e| KindError::invalid(format!("invalid timeout: {e}"))))
        .transpose()?;

    // Legacy sources spelled the connector as `type`
    let input_connector = match &node.legacy_type {
        Some(legacy) if node.connector_inferred => legacy.clone(),
        _ => node.connector.clone(),
    };
    let input_driver = ctx.driver(&input_connector);

    let mut input_properties = remaining_properties(config, &MODEL_KEYS);
    let mut refs = node.refs.clone();
    let sql = node.sql.trim();
    if !sql.is_empty() {
        refs.extend(infer_sql_refs(node, &input_driver)?);
        input_properties.insert("sql".into(), sql.into());
    }

    let mut analysis = Analysis::default();
    if input_driver == "local_file" {
        track_data_paths(&mut input_properties, &mut analysis, ctx)?;
    }

    let (output_connector, mut output_properties) = match &raw.output {
        None | Some(Value::Null) => (None, Mapping::new()),
        Some(Value::String(connector)) => (Some(connector.clone()), Mapping::new()),
        Some(Value::Mapping(map)) => {
            let mut props = map.clone();
            let connector = props
                .remove("connector")
                .and_then(|v| v.as_str().map(str::to_string));
            (connector, props)
        }
        Some(_) => {
            return Err(KindError::invalid(
                "expected connector name or mapping of output properties for 'output'",
            ));
        }
    };
    if let Some(materialize) = raw.materialize {
        output_properties.insert("materialize".into(), materialize.into());
    }

    let stage_properties = raw.stage.clone().unwrap_or_default();
    let stage_connector = stage_properties
        .get("connector")
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut stage_properties = stage_properties;
    stage_properties.remove("connector");

    let spec = ModelSpec {
        input_connector: input_connector.clone(),
        input_properties,
        output_connector: output_connector.unwrap_or_else(|| ctx.olap_connector.to_string()),
        output_properties,
        stage_connector,
        stage_properties,
        refresh,
        timeout_seconds,
        change_mode,
        incremental: raw.incremental,
        defined_as_source: raw.defined_as_source || node.defined_as_source,
    };

    let single = Analysis::single(node, ResourceKind::Model, refs, ResourceSpec::Model(spec));
    analysis.drafts = single.drafts;
    // The driver behind the input connector may come from a connector resource
    analysis.watched.push(input_connector);
    Ok(analysis)
}

/// Infers table refs from plain DuckDB SQL; other drivers and templated SQL are skipped.
fn infer_sql_refs(node: &Node, driver: &str) -> Result<Vec<ResourceName>, KindError> {
    if driver != "duckdb" || node.sql_uses_templating {
        return Ok(Vec::new());
    }
    let tables = infer_table_refs(&node.sql).map_err(|source| KindError::Sql {
        path: node
            .sql_path
            .clone()
            .unwrap_or_else(|| node.primary_path().to_string()),
        source,
    })?;
    Ok(tables
        .into_iter()
        .map(|t| ResourceName::new(ResourceKind::Unspecified, t))
        .collect())
}

/// Registers the local files a `local_file` model reads and hashes their contents
/// into the input properties, so edits to the data change the spec.
fn track_data_paths(
    props: &mut Mapping,
    analysis: &mut Analysis,
    ctx: &AnalyzeContext<'_>,
) -> Result<(), KindError> {
    if props.get("invalidate_on_change") == Some(&Value::Bool(false)) {
        return Ok(());
    }
    let Some(path) = props.get("path").and_then(Value::as_str).map(str::to_string) else {
        return Ok(());
    };

    let local_paths: Vec<String> = if is_glob(&path) {
        match ctx.repo.list_glob(&normalize_path(&path), true, false) {
            Ok(entries) if !entries.is_empty() => entries.into_iter().map(|e| e.path).collect(),
            // Reported when the model runs
            _ => return Ok(()),
        }
    } else {
        vec![normalize_path(&path)]
    };

    let hash = ctx.repo.hash(&local_paths)?;
    debug!(files = local_paths.len(), "Tracking local data files");
    props.insert("local_files_hash".into(), hash.into());
    analysis.data_paths.extend(local_paths);
    Ok(())
}
