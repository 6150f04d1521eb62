//! Metrics views
//!
//! A metrics view declares dimensions and measures over a model or table. Version
//! 0 files (the legacy dashboard format) also get an explore of the same name,
//! unless an explore with that name is declared elsewhere.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::common::{FieldSelector, display_name};
use super::explore::ExploreSpec;
use super::{Analysis, KindError, ResourceDraft, ResourceSpec};
use crate::core::{ResourceKind, ResourceName};
use crate::node::Node;
use crate::templating::analyze_template;
use crate::utils::yaml::{self, YamlError};

#[derive(Debug, Default, Deserialize)]
struct DimensionYaml {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    column: Option<String>,
    #[serde(default)]
    expression: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MeasureYaml {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    expression: String,
    #[serde(default)]
    format_preset: Option<String>,
    #[serde(default)]
    valid_percent_of_total: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityYaml {
    #[serde(default)]
    access: Option<Value>,
    #[serde(default)]
    row_filter: Option<String>,
    #[serde(default)]
    include: Vec<Value>,
    #[serde(default)]
    exclude: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct InlineExploreYaml {
    #[serde(default)]
    skip: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    theme: Option<String>,
    #[serde(default)]
    dimensions: Option<Value>,
    #[serde(default)]
    measures: Option<Value>,
    #[serde(default)]
    time_zones: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetricsViewYaml {
    #[serde(default)]
    display_name: Option<String>,
    /// Deprecated spelling of `display_name`
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    database_schema: Option<String>,
    #[serde(default)]
    timeseries: Option<String>,
    #[serde(default)]
    smallest_time_grain: Option<String>,
    #[serde(default)]
    first_day_of_week: Option<u32>,
    #[serde(default)]
    first_month_of_year: Option<u32>,
    #[serde(default)]
    dimensions: Vec<DimensionYaml>,
    #[serde(default)]
    measures: Vec<MeasureYaml>,
    #[serde(default)]
    security: Option<SecurityYaml>,
    #[serde(default)]
    explore: Option<InlineExploreYaml>,
    #[serde(default)]
    default_theme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dimension {
    pub name: String,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Measure {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_preset: Option<String>,
    pub valid_percent_of_total: bool,
}

/// Access rules applied when querying a metrics view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsViewSpec {
    pub connector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_schema: Option<String>,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_dimension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smallest_time_grain: Option<String>,
    pub first_day_of_week: u32,
    pub first_month_of_year: u32,
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityPolicy>,
}

const TIME_GRAINS: [&str; 9] = [
    "millisecond",
    "second",
    "minute",
    "hour",
    "day",
    "week",
    "month",
    "quarter",
    "year",
];

pub(super) fn validate_defaults(value: &Value) -> Result<(), YamlError> {
    yaml::decode::<MetricsViewYaml>(value).map(|_| ())
}

pub(super) fn analyze(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    let raw: MetricsViewYaml = yaml::decode(config)?;

    let mut refs = node.refs.clone();
    match (&raw.model, &raw.table) {
        (Some(_), Some(_)) => {
            return Err(KindError::invalid(
                r#"cannot set both the "model" field and the "table" field"#,
            ));
        }
        (None, None) => {
            return Err(KindError::invalid(
                r#"must set a value for either the "model" or "table" field"#,
            ));
        }
        (Some(model), None) | (None, Some(model)) => {
            refs.push(ResourceName::new(ResourceKind::Unspecified, model.clone()));
        }
    }

    if let Some(grain) = &raw.smallest_time_grain {
        if !TIME_GRAINS.contains(&grain.to_lowercase().as_str()) {
            return Err(KindError::invalid(format!(
                r#"invalid "smallest_time_grain": {grain:?}"#
            )));
        }
    }
    let first_day_of_week = raw.first_day_of_week.unwrap_or(1);
    if !(1..=7).contains(&first_day_of_week) {
        return Err(KindError::invalid(r#"invalid "first_day_of_week": must be between 1 and 7"#));
    }
    let first_month_of_year = raw.first_month_of_year.unwrap_or(1);
    if !(1..=12).contains(&first_month_of_year) {
        return Err(KindError::invalid(
            r#"invalid "first_month_of_year": must be between 1 and 12"#,
        ));
    }

    let dimensions = parse_dimensions(&raw.dimensions)?;
    let measures = parse_measures(&raw.measures)?;
    if measures.is_empty() {
        return Err(KindError::invalid("must define at least one measure"));
    }

    let security = match &raw.security {
        Some(sec) => Some(parse_security(sec, &mut refs)?),
        None => None,
    };

    let display = raw
        .display_name
        .clone()
        .or_else(|| raw.title.clone())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| display_name(&node.name));

    let spec = MetricsViewSpec {
        connector: node.connector.clone(),
        model: raw.model.clone(),
        table: raw.table.clone(),
        database: raw.database.clone(),
        database_schema: raw.database_schema.clone(),
        display_name: display,
        description: raw.description.clone(),
        time_dimension: raw.timeseries.clone(),
        smallest_time_grain: raw.smallest_time_grain.as_ref().map(|g| g.to_lowercase()),
        first_day_of_week,
        first_month_of_year,
        dimensions,
        measures,
        security,
    };

    let mut analysis = Analysis::single(node, ResourceKind::MetricsView, refs, ResourceSpec::MetricsView(spec.clone()));
    if let Some(explore) = companion_explore(node, &raw, &spec)? {
        analysis.drafts.push(explore);
    }
    Ok(analysis)
}

fn parse_dimensions(raw: &[DimensionYaml]) -> Result<Vec<Dimension>, KindError> {
    let mut seen = std::collections::BTreeSet::new();
    let mut dimensions = Vec::with_capacity(raw.len());
    for (i, d) in raw.iter().enumerate() {
        let name = d
            .name
            .clone()
            .or_else(|| d.column.clone())
            .filter(|n| !n.is_empty());
        let Some(name) = name else {
            return Err(KindError::invalid(format!(
                "dimension at index {i}: must have a name or column"
            )));
        };
        if !seen.insert(name.to_lowercase()) {
            return Err(KindError::invalid(format!("found duplicate dimension {name:?}")));
        }
        let display = d
            .display_name
            .clone()
            .or_else(|| d.label.clone())
            .unwrap_or_else(|| display_name(&name));
        dimensions.push(Dimension {
            column: d.column.clone().or_else(|| {
                d.expression.is_none().then(|| name.clone())
            }),
            name,
            display_name: display,
            description: d.description.clone(),
            expression: d.expression.clone(),
        });
    }
    Ok(dimensions)
}

fn parse_measures(raw: &[MeasureYaml]) -> Result<Vec<Measure>, KindError> {
    let mut seen = std::collections::BTreeSet::new();
    let mut measures = Vec::with_capacity(raw.len());
    for (i, m) in raw.iter().enumerate() {
        if m.expression.trim().is_empty() {
            return Err(KindError::invalid(format!(
                "measure at index {i}: must have an expression"
            )));
        }
        let name = m
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("measure_{i}"));
        if !seen.insert(name.to_lowercase()) {
            return Err(KindError::invalid(format!("found duplicate measure {name:?}")));
        }
        let display = m
            .display_name
            .clone()
            .or_else(|| m.label.clone())
            .unwrap_or_else(|| display_name(&name));
        measures.push(Measure {
            name,
            display_name: display,
            description: m.description.clone(),
            expression: m.expression.clone(),
            format_preset: m.format_preset.clone(),
            valid_percent_of_total: m.valid_percent_of_total,
        });
    }
    Ok(measures)
}

fn parse_security(
    raw: &SecurityYaml,
    refs: &mut Vec<ResourceName>,
) -> Result<SecurityPolicy, KindError> {
    let access = match &raw.access {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(KindError::invalid(
                r#"invalid "security.access": must be a bool or an expression"#,
            ));
        }
    };
    // Templated filters may reference other resources
    for expr in access.iter().chain(raw.row_filter.iter()) {
        let meta = analyze_template(expr)?;
        refs.extend(meta.refs);
    }
    let names = |values: &[Value], property: &str| -> Result<Vec<String>, KindError> {
        values
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    KindError::invalid(format!("invalid \"security.{property}\": must be names"))
                })
            })
            .collect()
    };
    Ok(SecurityPolicy {
        access,
        row_filter: raw.row_filter.clone(),
        include: names(&raw.include, "include")?,
        exclude: names(&raw.exclude, "exclude")?,
    })
}

/// The explore emitted alongside a metrics view: the inline `explore:` block if
/// present, otherwise an implicit explore for version 0 files.
fn companion_explore(
    node: &Node,
    raw: &MetricsViewYaml,
    spec: &MetricsViewSpec,
) -> Result<Option<ResourceDraft>, KindError> {
    let mut refs = vec![ResourceName::new(ResourceKind::MetricsView, node.name.clone())];

    if let Some(inline) = &raw.explore {
        if inline.skip {
            return Ok(None);
        }
        let name = inline.name.clone().unwrap_or_else(|| node.name.clone());
        if let Some(theme) = &inline.theme {
            refs.push(ResourceName::new(ResourceKind::Theme, theme.clone()));
        }
        let explore = ExploreSpec {
            display_name: inline
                .display_name
                .clone()
                .unwrap_or_else(|| display_name(&name)),
            description: inline.description.clone(),
            metrics_view: node.name.clone(),
            dimensions: FieldSelector::parse(inline.dimensions.as_ref(), "explore.dimensions")?,
            measures: FieldSelector::parse(inline.measures.as_ref(), "explore.measures")?,
            theme: inline.theme.clone(),
            time_zones: inline.time_zones.clone(),
            allow_custom_time_range: true,
            defined_in_metrics_view: true,
        };
        return Ok(Some(ResourceDraft {
            name: ResourceName::new(ResourceKind::Explore, name),
            paths: node.paths.clone(),
            refs,
            spec: ResourceSpec::Explore(explore),
            implicit: false,
        }));
    }

    if node.version > 0 {
        return Ok(None);
    }
    if let Some(theme) = &raw.default_theme {
        refs.push(ResourceName::new(ResourceKind::Theme, theme.clone()));
    }
    let explore = ExploreSpec {
        display_name: spec.display_name.clone(),
        description: spec.description.clone(),
        metrics_view: node.name.clone(),
        dimensions: FieldSelector::Names(spec.dimensions.iter().map(|d| d.name.clone()).collect()),
        measures: FieldSelector::Names(spec.measures.iter().map(|m| m.name.clone()).collect()),
        theme: raw.default_theme.clone(),
        time_zones: Vec::new(),
        allow_custom_time_range: true,
        defined_in_metrics_view: true,
    };
    Ok(Some(ResourceDraft {
        name: ResourceName::new(ResourceKind::Explore, node.name.clone()),
        paths: node.paths.clone(),
        refs,
        spec: ResourceSpec::Explore(explore),
        implicit: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::tests::analyze_files;

    const MV: &str = r#"
type: metrics_view
version: 1
model: orders
timeseries: created_at
dimensions:
  - column: country
  - name: upper_city
    expression: upper(city)
measures:
  - name: total
    expression: count(*)
  - expression: sum(amount)
"#;

    fn mv_spec(analysis: &Analysis) -> &MetricsViewSpec {
        match &analysis.drafts[0].spec {
            ResourceSpec::MetricsView(spec) => spec,
            other => panic!("expected a metrics view, got {other:?}"),
        }
    }

    #[test]
    fn test_metrics_view() {
        let analysis = analyze_files(Some(("/metrics/mv1.yaml", MV)), None).unwrap();
        assert_eq!(analysis.drafts.len(), 1);
        let draft = &analysis.drafts[0];
        assert_eq!(draft.name, ResourceName::new(ResourceKind::MetricsView, "mv1"));
        assert_eq!(
            draft.refs,
            vec![ResourceName::new(ResourceKind::Unspecified, "orders")]
        );

        let spec = mv_spec(&analysis);
        assert_eq!(spec.display_name, "Mv1");
        assert_eq!(spec.dimensions[0].name, "country");
        assert_eq!(spec.dimensions[0].column.as_deref(), Some("country"));
        assert_eq!(spec.dimensions[1].display_name, "Upper City");
        assert_eq!(spec.measures[1].name, "measure_1");
        assert_eq!(spec.first_day_of_week, 1);
    }

    #[test]
    fn test_version_zero_emits_implicit_explore() {
        let text = MV.replace("version: 1\n", "");
        let analysis = analyze_files(Some(("/dashboards/d1.yaml", &text)), None).unwrap();
        assert_eq!(analysis.drafts.len(), 2);
        let explore = &analysis.drafts[1];
        assert_eq!(explore.name, ResourceName::new(ResourceKind::Explore, "d1"));
        assert!(explore.implicit);
        assert_eq!(
            explore.refs,
            vec![ResourceName::new(ResourceKind::MetricsView, "d1")]
        );
    }

    #[test]
    fn test_inline_explore() {
        let text = format!("{MV}explore:\n  name: e1\n  theme: dark\n");
        let analysis = analyze_files(Some(("/metrics/mv1.yaml", &text)), None).unwrap();
        let explore = &analysis.drafts[1];
        assert_eq!(explore.name, ResourceName::new(ResourceKind::Explore, "e1"));
        assert!(!explore.implicit);
        assert!(explore.refs.contains(&ResourceName::new(ResourceKind::Theme, "dark")));

        let skipped = format!("{MV}explore:\n  skip: true\n").replace("version: 1\n", "");
        let analysis = analyze_files(Some(("/metrics/mv1.yaml", &skipped)), None).unwrap();
        assert_eq!(analysis.drafts.len(), 1);
    }

    #[test]
    fn test_model_and_table_conflict() {
        let text = MV.replace("model: orders", "model: orders\ntable: raw");
        let err = analyze_files(Some(("/metrics/mv1.yaml", &text)), None).unwrap_err();
        assert!(err.to_string().contains("cannot set both"));
    }

    #[test]
    fn test_templated_row_filter_adds_refs() {
        let text = format!(
            "{MV}security:\n  access: true\n  row_filter: 'region IN (SELECT region FROM {{{{ ref \"mappings\" }}}}) AND domain = {{{{ .user.domain }}}}'\n"
        );
        let analysis = analyze_files(Some(("/metrics/mv1.yaml", &text)), None).unwrap();
        assert!(analysis.drafts[0]
            .refs
            .contains(&ResourceName::new(ResourceKind::Unspecified, "mappings")));
        let spec = mv_spec(&analysis);
        assert_eq!(
            spec.security.as_ref().and_then(|s| s.access.as_deref()),
            Some("true")
        );
    }

    #[test]
    fn test_invalid_measures() {
        let text = MV.replace("  - expression: sum(amount)\n", "  - name: empty\n");
        let err = analyze_files(Some(("/metrics/mv1.yaml", &text)), None).unwrap_err();
        assert!(err.to_string().contains("must have an expression"));
    }
}
