//! Reports and alerts

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use super::common::{
    DataYaml, Notifier, NotifyYaml, RecipientsYaml, Schedule, ScheduleYaml, parse_duration,
    parse_notifiers, parse_schedule, reject_sql_and_connector,
};
use super::{Analysis, KindError, ResourceSpec};
use crate::core::{ResourceKind, ResourceName};
use crate::node::Node;
use crate::utils::yaml;

const EXPORT_FORMATS: [&str; 3] = ["csv", "xlsx", "parquet"];

#[derive(Debug, Default, Deserialize)]
struct QueryYaml {
    #[serde(default)]
    name: String,
    #[serde(default)]
    args: Option<Mapping>,
    #[serde(default)]
    args_json: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportYaml {
    #[serde(default)]
    format: String,
    #[serde(default)]
    include_header: bool,
    #[serde(default)]
    limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReportYaml {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    refresh: Option<ScheduleYaml>,
    #[serde(default)]
    timeout: Option<Value>,
    #[serde(default)]
    query: QueryYaml,
    #[serde(default)]
    export: ExportYaml,
    /// Deprecated spelling of `notify.email`
    #[serde(default)]
    email: RecipientsYaml,
    #[serde(default)]
    notify: NotifyYaml,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSpec {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<Schedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    pub query_name: String,
    pub query_args_json: String,
    pub export_format: String,
    pub export_include_header: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_limit: Option<u64>,
    pub notifiers: Vec<Notifier>,
    pub annotations: BTreeMap<String, String>,
}

pub(super) fn analyze_report(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    reject_sql_and_connector(node, "reports")?;
    let raw: ReportYaml = yaml::decode(config)?;

    let refresh = parse_schedule(raw.refresh.as_ref(), false)?;
    let timeout_seconds = parse_timeout(raw.timeout.as_ref())?;

    if raw.query.name.trim().is_empty() {
        return Err(KindError::invalid(r#"missing required property "query.name""#));
    }
    let query_args_json = match (&raw.query.args_json, &raw.query.args) {
        (Some(json), _) => {
            serde_json::from_str::<serde_json::Value>(json).map_err(|_| {
                KindError::invalid(r#"failed to parse "query.args_json" as JSON"#)
            })?;
            json.clone()
        }
        (None, args) => serde_json::to_string(&args.clone().unwrap_or_default()).map_err(|e| {
            KindError::invalid(format!(r#"failed to serialize "query.args" to JSON: {e}"#))
        })?,
    };

    let format = raw.export.format.trim().to_lowercase();
    if format.is_empty() {
        return Err(KindError::invalid(r#"missing required property "export.format""#));
    }
    if !EXPORT_FORMATS.contains(&format.as_str()) {
        return Err(KindError::invalid(format!(
            r#"invalid value {format:?} for property "export.format""#
        )));
    }

    let notifiers = parse_notifiers(&raw.notify, &raw.email.recipients)?;

    let spec = ReportSpec {
        display_name: raw
            .display_name
            .or(raw.title)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| node.name.clone()),
        refresh,
        timeout_seconds,
        query_name: raw.query.name,
        query_args_json,
        export_format: format,
        export_include_header: raw.export.include_header,
        export_limit: raw.export.limit,
        notifiers,
        annotations: raw.annotations,
    };
    Ok(Analysis::single(node, ResourceKind::Report, node.refs.clone(), ResourceSpec::Report(spec)))
}

#[derive(Debug, Default, Deserialize)]
struct AlertYaml {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    refresh: Option<ScheduleYaml>,
    #[serde(default)]
    timeout: Option<Value>,
    #[serde(default)]
    data: DataYaml,
    #[serde(default)]
    on_recover: bool,
    #[serde(default)]
    on_fail: Option<bool>,
    #[serde(default)]
    on_error: bool,
    #[serde(default)]
    renotify: bool,
    #[serde(default)]
    renotify_after: Option<Value>,
    #[serde(default)]
    notify: NotifyYaml,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSpec {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<Schedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    pub resolver: String,
    pub resolver_properties: Mapping,
    pub notify_on_recover: bool,
    pub notify_on_fail: bool,
    pub notify_on_error: bool,
    pub renotify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renotify_after_seconds: Option<u64>,
    pub notifiers: Vec<Notifier>,
    pub annotations: BTreeMap<String, String>,
}

pub(super) fn analyze_alert(node: &Node, config: &Value) -> Result<Analysis, KindError> {
    reject_sql_and_connector(node, "alerts")?;
    let raw: AlertYaml = yaml::decode(config)?;

    if raw.data.is_empty() {
        return Err(KindError::invalid(r#"missing required property "data""#));
    }
    let resolver = raw.data.resolver()?;

    let mut refs: Vec<ResourceName> = node.refs.clone();
    refs.extend(resolver.refs);

    // Alerts without a timer re-evaluate when what they read changes
    let refresh = parse_schedule(raw.refresh.as_ref(), !refs.is_empty())?;
    let timeout_seconds = parse_timeout(raw.timeout.as_ref())?;
    let renotify_after_seconds = raw
        .renotify_after
        .as_ref()
        .map(|v| {
            parse_duration(v).map_err(|e| KindError::invalid(format!("invalid renotify_after: {e}")))
        })
        .transpose()?;

    let notifiers = parse_notifiers(&raw.notify, &[])?;

    let spec = AlertSpec {
        display_name: raw
            .display_name
            .or(raw.title)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| node.name.clone()),
        refresh,
        timeout_seconds,
        resolver: resolver.name,
        resolver_properties: resolver.properties,
        notify_on_recover: raw.on_recover,
        notify_on_fail: raw.on_fail.unwrap_or(true),
        notify_on_error: raw.on_error,
        renotify: raw.renotify,
        renotify_after_seconds,
        notifiers,
        annotations: raw.annotations,
    };
    Ok(Analysis::single(node, ResourceKind::Alert, refs, ResourceSpec::Alert(spec)))
}

fn parse_timeout(value: Option<&Value>) -> Result<Option<u64>, KindError> {
    value
        .map(|v| parse_duration(v).map_err(|e| KindError::invalid(format!("invalid timeout: {e}"))))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::tests::analyze_files;

    const REPORT: &str = r#"
type: report
title: Weekly
refresh:
  cron: 0 9 * * 1
query:
  name: MetricsViewAggregation
  args:
    metrics_view: mv1
export:
  format: CSV
notify:
  email:
    recipients: [team@example.com]
"#;

    #[test]
    fn test_report() {
        let analysis = analyze_files(Some(("/reports/r.yaml", REPORT)), None).unwrap();
        let ResourceSpec::Report(spec) = &analysis.drafts[0].spec else {
            panic!("expected a report");
        };
        assert_eq!(spec.display_name, "Weekly");
        assert_eq!(spec.export_format, "csv");
        assert_eq!(spec.query_args_json, r#"{"metrics_view":"mv1"}"#);
        assert_eq!(spec.notifiers.len(), 1);
        assert_eq!(
            spec.refresh.as_ref().and_then(|s| s.cron.as_deref()),
            Some("0 9 * * 1")
        );
    }

    #[test]
    fn test_report_validation() {
        let no_format = REPORT.replace("  format: CSV\n", "  include_header: true\n");
        let err = analyze_files(Some(("/reports/r.yaml", &no_format)), None).unwrap_err();
        assert!(err.to_string().contains("export.format"));

        let both = format!("{REPORT}email:\n  recipients: [x@example.com]\n");
        let err = analyze_files(Some(("/reports/r.yaml", &both)), None).unwrap_err();
        assert!(err.to_string().contains("cannot set both"));

        let bad_json = REPORT.replace("  args:\n    metrics_view: mv1\n", "  args_json: '{'\n");
        let err = analyze_files(Some(("/reports/r.yaml", &bad_json)), None).unwrap_err();
        assert!(err.to_string().contains("args_json"));
    }

    #[test]
    fn test_alert_refs_from_metrics_sql() {
        let analysis = analyze_files(
            Some((
                "/alerts/a.yaml",
                "type: alert\ndata:\n  metrics_sql: SELECT total FROM mv1 HAVING total > 10\nnotify:\n  slack:\n    channels: ['#alerts']",
            )),
            None,
        )
        .unwrap();
        let draft = &analysis.drafts[0];
        assert_eq!(draft.refs, vec![ResourceName::new(ResourceKind::MetricsView, "mv1")]);
        let ResourceSpec::Alert(spec) = &draft.spec else {
            panic!("expected an alert");
        };
        assert_eq!(spec.resolver, "metrics_sql");
        assert!(spec.refresh.as_ref().is_some_and(|s| s.ref_update));
        assert!(spec.notify_on_fail);
    }

    #[test]
    fn test_alert_requires_data() {
        let err = analyze_files(Some(("/alerts/a.yaml", "type: alert")), None).unwrap_err();
        assert!(err.to_string().contains("data"));
    }
}
