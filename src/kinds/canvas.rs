//! Components and canvases
//!
//! A component is a single renderer (`kpi`, `line_chart`, `markdown`, ...) with
//! its properties. A canvas lays components out in rows; each item either names
//! a component declared elsewhere or defines one inline, in which case the
//! canvas emits that component as an extra resource named
//! `<canvas>--component-<row>-<item>`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::sync::OnceLock;

use super::common::{display_name, reject_sql_and_connector};
use super::{Analysis, KindError, ResourceDraft, ResourceSpec};
use crate::core::{ResourceKind, ResourceName};
use crate::node::Node;
use crate::utils::yaml::{self, YamlError};

/// Keys of a component definition that are not its renderer.
const COMPONENT_KEYS: [&str; 5] = ["display_name", "title", "description", "input", "output"];

/// Keys of a canvas item that are not part of an inline component.
const ITEM_KEYS: [&str; 2] = ["width", "component"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentSpec {
    pub display_name: String,
    pub description: String,
    pub renderer: String,
    pub renderer_properties: Mapping,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub defined_in_canvas: bool,
}

/// Parses a component definition given as a map; returns the spec and the
/// metrics views its renderer reads.
fn parse_component(map: &Mapping) -> Result<(ComponentSpec, Vec<ResourceName>), KindError> {
    let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

    let mut renderers = map.iter().filter_map(|(k, v)| {
        let key = k.as_str()?;
        (!ITEM_KEYS.contains(&key)
            && !COMPONENT_KEYS.contains(&key)
            && !super::common::COMMON_KEYS.contains(&key))
        .then_some((key, v))
    });
    let Some((renderer, props)) = renderers.next() else {
        return Err(KindError::invalid("missing renderer configuration"));
    };
    if let Some((other, _)) = renderers.next() {
        return Err(KindError::invalid(format!(
            "found multiple renderers: {renderer:?} and {other:?}"
        )));
    }
    let renderer_properties = match props {
        Value::Mapping(m) => m.clone(),
        Value::Null => Mapping::new(),
        _ => {
            return Err(KindError::invalid(format!(
                "invalid properties for renderer {renderer:?}: must be a map"
            )));
        }
    };

    let mut refs = Vec::new();
    if let Some(mv) = renderer_properties.get("metrics_view").and_then(Value::as_str) {
        refs.push(ResourceName::new(ResourceKind::MetricsView, mv));
    }

    let spec = ComponentSpec {
        display_name: text("display_name").or_else(|| text("title")).unwrap_or_default(),
        description: text("description").unwrap_or_default(),
        renderer: renderer.to_string(),
        renderer_properties,
        input: map.get("input").cloned(),
        output: map.get("output").cloned(),
        defined_in_canvas: false,
    };
    Ok((spec, refs))
}

pub(super) fn analyze_component(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    reject_sql_and_connector(node, "components")?;
    let map = config.as_mapping().cloned().unwrap_or_default();
    let (mut spec, component_refs) = parse_component(&map)?;
    if spec.display_name.is_empty() {
        spec.display_name = display_name(&node.name);
    }
    let mut refs = node.refs.clone();
    refs.extend(component_refs);
    Ok(Analysis::single(node, ResourceKind::Component, refs, ResourceSpec::Component(spec)))
}

#[derive(Debug, Default, Deserialize)]
struct RowYaml {
    #[serde(default)]
    height: Option<String>,
    #[serde(default)]
    items: Vec<Option<Mapping>>,
}

#[derive(Debug, Default, Deserialize)]
struct CanvasYaml {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    banner: String,
    #[serde(default)]
    max_width: u32,
    #[serde(default)]
    theme: Option<String>,
    #[serde(default)]
    allow_custom_time_range: Option<bool>,
    #[serde(default)]
    time_zones: Vec<String>,
    #[serde(default)]
    rows: Vec<Option<RowYaml>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanvasItem {
    pub component: String,
    pub defined_in_canvas: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    pub width_unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanvasRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub height_unit: String,
    pub items: Vec<CanvasItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanvasSpec {
    pub display_name: String,
    pub banner: String,
    pub max_width: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    pub allow_custom_time_range: bool,
    pub time_zones: Vec<String>,
    pub rows: Vec<CanvasRow>,
}

pub(super) fn validate_defaults(value: &Value) -> Result<(), YamlError> {
    yaml::decode::<CanvasYaml>(value).map(|_| ())
}

pub(super) fn analyze_canvas(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    reject_sql_and_connector(node, "canvases")?;
    let raw: CanvasYaml = yaml::decode(config)?;

    let mut refs = node.refs.clone();
    if let Some(theme) = raw.theme.as_ref().filter(|t| !t.is_empty()) {
        refs.push(ResourceName::new(ResourceKind::Theme, theme.clone()));
    }

    let mut rows = Vec::with_capacity(raw.rows.len());
    let mut inline = Vec::new();
    for (i, row) in raw.rows.iter().enumerate() {
        let Some(row) = row else {
            return Err(KindError::invalid(format!("row at index {i} is empty")));
        };

        let (height, height_unit) = match &row.height {
            Some(h) => {
                let (v, unit) = parse_item_size(h)
                    .map_err(|e| KindError::invalid(format!("invalid height for row {i}: {e}")))?;
                if v != 0 && unit != "px" {
                    return Err(KindError::invalid(format!(
                        "invalid height unit {unit:?} for row {i}: unit must be 'px'"
                    )));
                }
                (Some(v), unit)
            }
            None => (None, String::new()),
        };

        let mut items = Vec::with_capacity(row.items.len());
        for (j, item) in row.items.iter().enumerate() {
            let Some(item) = item else {
                return Err(KindError::invalid(format!("item {j} in row {i} is empty")));
            };

            let width = match item.get("width") {
                None | Some(Value::Null) => None,
                Some(w) => {
                    let text = yaml::scalar_to_string(w).unwrap_or_default();
                    let (v, unit) = parse_item_size(&text).map_err(|e| {
                        KindError::invalid(format!("invalid width for item {j} in row {i}: {e}"))
                    })?;
                    if !unit.is_empty() {
                        return Err(KindError::invalid(format!(
                            "invalid width unit {unit:?} for item {j} in row {i}: 'width' cannot have a unit"
                        )));
                    }
                    Some(v)
                }
            };

            let (component, defined_in_canvas) = match inline_definition(item) {
                Definition::Named(name) => (name, false),
                Definition::Inline(def) => {
                    let (mut spec, component_refs) = parse_component(&def).map_err(|e| {
                        KindError::invalid(format!("invalid component for item {j} in row {i}: {e}"))
                    })?;
                    spec.defined_in_canvas = true;
                    let name = format!("{}--component-{i}-{j}", node.name);
                    if spec.display_name.is_empty() {
                        spec.display_name = display_name(&name);
                    }
                    inline.push(ResourceDraft {
                        name: ResourceName::new(ResourceKind::Component, name.clone()),
                        paths: node.paths.clone(),
                        refs: component_refs,
                        spec: ResourceSpec::Component(spec),
                        implicit: false,
                    });
                    (name, true)
                }
                Definition::Missing => {
                    return Err(KindError::invalid(format!(
                        "item {j} in row {i} is missing a component definition"
                    )));
                }
                Definition::Conflicting => {
                    return Err(KindError::invalid(format!(
                        "item {j} in row {i} has properties incompatible with 'component'"
                    )));
                }
            };

            refs.push(ResourceName::new(ResourceKind::Component, component.clone()));
            items.push(CanvasItem {
                component,
                defined_in_canvas,
                width,
                width_unit: String::new(),
            });
        }

        rows.push(CanvasRow {
            height,
            height_unit,
            items,
        });
    }

    // Link the canvas straight to the metrics views its inline components read
    for draft in &inline {
        for r in &draft.refs {
            if r.kind == ResourceKind::MetricsView && !refs.contains(r) {
                refs.push(r.clone());
            }
        }
    }

    let spec = CanvasSpec {
        display_name: raw
            .display_name
            .or(raw.title)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| display_name(&node.name)),
        banner: raw.banner,
        max_width: raw.max_width,
        theme: raw.theme.filter(|t| !t.is_empty()),
        allow_custom_time_range: raw.allow_custom_time_range.unwrap_or(true),
        time_zones: raw.time_zones,
        rows,
    };

    let mut analysis =
        Analysis::single(node, ResourceKind::Canvas, refs, ResourceSpec::Canvas(spec));
    analysis.drafts.extend(inline);
    Ok(analysis)
}

enum Definition {
    Named(String),
    Inline(Mapping),
    Missing,
    Conflicting,
}

/// Classifies a canvas item: `component: <name>`, `component: {...}`, or the
/// component's keys given directly on the item.
fn inline_definition(item: &Mapping) -> Definition {
    let rest: Mapping = item
        .iter()
        .filter(|(k, _)| k.as_str().is_none_or(|k| !ITEM_KEYS.contains(&k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    match item.get("component") {
        Some(_) if !rest.is_empty() => Definition::Conflicting,
        Some(Value::String(name)) if !name.is_empty() => Definition::Named(name.clone()),
        Some(Value::Mapping(def)) => Definition::Inline(def.clone()),
        Some(_) => Definition::Missing,
        None if rest.is_empty() => Definition::Missing,
        None => Definition::Inline(rest),
    }
}

/// Parses `<int><space?><unit?>`, e.g. `100`, `100px` or `100 px`.
fn parse_item_size(s: &str) -> Result<(u32, String), String> {
    static SIZE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let s = s.trim();
    if s.is_empty() {
        return Ok((0, String::new()));
    }
    let caps = SIZE_RE
        .get_or_init(|| Regex::new(r"^(\d+)\s*(.*)$").ok())
        .as_ref()
        .and_then(|re| re.captures(s))
        .ok_or_else(|| format!("invalid size {s:?}"))?;
    let size = caps
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .parse::<u32>()
        .map_err(|e| format!("invalid size {s:?}: {e}"))?;
    let unit = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
    Ok((size, unit))
}
