//! Building blocks shared by several analyzers

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::sync::OnceLock;

use super::KindError;
use crate::core::{ResourceKind, ResourceName};
use crate::node::Node;

/// Keys every resource file may carry; never part of kind-specific properties.
pub(crate) const COMMON_KEYS: [&str; 13] = [
    "version",
    "type",
    "kind",
    "name",
    "namespace",
    "refs",
    "parser",
    "connector",
    "sql",
    "environment_overrides",
    "env",
    "dev",
    "prod",
];

/// Returns the entries of `config` not named in `COMMON_KEYS` or `known`.
pub(crate) fn remaining_properties(config: &Value, known: &[&str]) -> Mapping {
    let Some(map) = config.as_mapping() else {
        return Mapping::new();
    };
    map.iter()
        .filter(|(key, _)| {
            key.as_str()
                .is_none_or(|k| !COMMON_KEYS.contains(&k) && !known.contains(&k))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Fails if a kind that takes neither SQL nor a connector got either.
pub(crate) fn reject_sql_and_connector(node: &Node, plural: &str) -> Result<(), KindError> {
    if !node.sql.trim().is_empty() {
        return Err(KindError::invalid(format!("{plural} cannot have SQL")));
    }
    if !node.connector_inferred {
        return Err(KindError::invalid(format!("{plural} cannot have a connector")));
    }
    Ok(())
}

/// Renders a resource name for humans: `orders_daily` becomes `Orders Daily`,
/// `foo:e1` becomes `Foo: E1`.
pub fn display_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut word_start = true;
    for c in name.chars() {
        match c {
            '_' | '-' | ' ' => {
                if !out.ends_with(' ') && !out.is_empty() {
                    out.push(' ');
                }
                word_start = true;
            }
            ':' => {
                out.push_str(": ");
                word_start = true;
            }
            c if word_start => {
                out.extend(c.to_uppercase());
                word_start = false;
            }
            c => out.push(c),
        }
    }
    out.trim_end().to_string()
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ScheduleYaml {
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub every: Option<Value>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub ref_update: Option<bool>,
    #[serde(default)]
    pub run_in_dev: bool,
    #[serde(default)]
    pub disable: bool,
}

/// When a resource refreshes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub ref_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    pub disable: bool,
    pub run_in_dev: bool,
}

/// Parses a `refresh:` block; `default_ref_update` applies when none is given.
pub(crate) fn parse_schedule(
    raw: Option<&ScheduleYaml>,
    default_ref_update: bool,
) -> Result<Option<Schedule>, KindError> {
    let Some(raw) = raw else {
        return Ok(default_ref_update.then(|| Schedule {
            ref_update: true,
            ..Default::default()
        }));
    };

    if let Some(cron) = &raw.cron {
        validate_cron(cron)?;
    }
    let ticker_seconds = raw
        .every
        .as_ref()
        .map(|v| parse_duration(v).map_err(|e| KindError::invalid(format!("invalid ticker: {e}"))))
        .transpose()?;
    let has_timer = raw.cron.is_some() || ticker_seconds.is_some();

    Ok(Some(Schedule {
        ref_update: raw.ref_update.unwrap_or(default_ref_update && !has_timer),
        cron: raw.cron.clone(),
        ticker_seconds,
        time_zone: raw.time_zone.clone(),
        disable: raw.disable,
        run_in_dev: raw.run_in_dev,
    }))
}

fn validate_cron(cron: &str) -> Result<(), KindError> {
    const MACROS: [&str; 7] = [
        "@yearly",
        "@annually",
        "@monthly",
        "@weekly",
        "@daily",
        "@midnight",
        "@hourly",
    ];
    let cron = cron.trim();
    let fields = cron.split_whitespace().count();
    if MACROS.contains(&cron) || fields == 5 || fields == 6 {
        return Ok(());
    }
    Err(KindError::invalid(format!(
        "invalid cron schedule {cron:?}: expected 5 fields"
    )))
}

/// Parses a duration in seconds: a bare integer, or units such as `90s`, `5m` or `1h30m`.
pub(crate) fn parse_duration(value: &Value) -> Result<u64, String> {
    static SEGMENT_RE: OnceLock<Option<Regex>> = OnceLock::new();

    let text = match value {
        Value::Number(n) => return n.as_u64().ok_or_else(|| format!("invalid duration {n}")),
        Value::String(s) => s.trim(),
        _ => return Err("duration must be a string or an integer".to_string()),
    };
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(seconds);
    }

    let re = SEGMENT_RE
        .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)(ms|s|m|h)").ok())
        .as_ref()
        .ok_or_else(|| "duration pattern unavailable".to_string())?;

    let mut total = 0.0_f64;
    let mut consumed = 0;
    for caps in re.captures_iter(text) {
        let (Some(whole), Some(amount), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if whole.start() != consumed {
            break;
        }
        consumed = whole.end();
        let amount: f64 = amount
            .as_str()
            .parse()
            .map_err(|_| format!("invalid duration {text:?}"))?;
        total += match unit.as_str() {
            "ms" => amount / 1000.0,
            "s" => amount,
            "m" => amount * 60.0,
            _ => amount * 3600.0,
        };
    }
    if consumed == 0 || consumed != text.len() {
        return Err(format!("invalid duration {text:?}"));
    }
    Ok(total.round() as u64)
}

/// Which dimensions or measures an explore exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSelector {
    #[default]
    All,
    Names(Vec<String>),
    Exclude(Vec<String>),
}

impl FieldSelector {
    pub(crate) fn parse(value: Option<&Value>, property: &str) -> Result<Self, KindError> {
        let invalid = || {
            KindError::invalid(format!(
                "invalid {property:?}: must be '*', a list of names or {{exclude: [...]}}"
            ))
        };
        match value {
            None | Some(Value::Null) => Ok(FieldSelector::All),
            Some(Value::String(s)) if s.trim() == "*" => Ok(FieldSelector::All),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
                .collect::<Result<_, _>>()
                .map(FieldSelector::Names),
            Some(Value::Mapping(map)) => match map.get("exclude") {
                Some(Value::Sequence(items)) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
                    .collect::<Result<_, _>>()
                    .map(FieldSelector::Exclude),
                _ => Err(invalid()),
            },
            Some(_) => Err(invalid()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RecipientsYaml {
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SlackYaml {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub webhooks: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NotifyYaml {
    #[serde(default)]
    pub email: RecipientsYaml,
    #[serde(default)]
    pub slack: SlackYaml,
}

/// A notification target for reports and alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "connector", rename_all = "snake_case")]
pub enum Notifier {
    Email {
        recipients: Vec<String>,
    },
    Slack {
        users: Vec<String>,
        channels: Vec<String>,
        webhooks: Vec<String>,
    },
}

/// Validates recipients and collects the configured notifiers.
///
/// `legacy_email` is the deprecated top-level `email.recipients`.
pub(crate) fn parse_notifiers(
    notify: &NotifyYaml,
    legacy_email: &[String],
) -> Result<Vec<Notifier>, KindError> {
    if !legacy_email.is_empty() && !notify.email.recipients.is_empty() {
        return Err(KindError::invalid(
            r#"cannot set both "email.recipients" and "notify.email.recipients""#,
        ));
    }
    let emails = if legacy_email.is_empty() {
        &notify.email.recipients
    } else {
        legacy_email
    };
    for email in emails {
        if !is_email(email) {
            return Err(KindError::invalid(format!("invalid recipient email address {email:?}")));
        }
    }

    let mut notifiers = Vec::new();
    if !emails.is_empty() {
        notifiers.push(Notifier::Email {
            recipients: emails.to_vec(),
        });
    }
    let slack = &notify.slack;
    if !slack.users.is_empty() || !slack.channels.is_empty() || !slack.webhooks.is_empty() {
        for user in &slack.users {
            if !is_email(user) {
                return Err(KindError::invalid(format!("invalid Slack user email {user:?}")));
            }
        }
        notifiers.push(Notifier::Slack {
            users: slack.users.clone(),
            channels: slack.channels.clone(),
            webhooks: slack.webhooks.clone(),
        });
    }
    Ok(notifiers)
}

fn is_email(s: &str) -> bool {
    static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(s))
}

/// A `data:` block naming a resolver and its properties.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DataYaml {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub connector: Option<String>,
    #[serde(default)]
    pub metrics_sql: Option<String>,
    #[serde(default)]
    pub api: Option<String>,
    #[serde(default)]
    pub args: Option<Mapping>,
    #[serde(default)]
    pub glob: Option<Value>,
    #[serde(default)]
    pub resource_status: Option<Value>,
}

/// A parsed data block.
pub(crate) struct Resolver {
    pub name: String,
    pub properties: Mapping,
    pub refs: Vec<ResourceName>,
}

impl DataYaml {
    pub(crate) fn is_empty(&self) -> bool {
        self.sql.is_none()
            && self.metrics_sql.is_none()
            && self.api.is_none()
            && self.glob.is_none()
            && self.resource_status.is_none()
    }

    /// Picks the resolver; exactly one kind of data source must be set.
    pub(crate) fn resolver(&self) -> Result<Resolver, KindError> {
        let set = [
            self.sql.is_some(),
            self.metrics_sql.is_some(),
            self.api.is_some(),
            self.glob.is_some(),
            self.resource_status.is_some(),
        ]
        .into_iter()
        .filter(|b| *b)
        .count();
        if set != 1 {
            return Err(KindError::invalid(
                "the data block must contain exactly one of 'sql', 'metrics_sql', 'api', 'glob' or 'resource_status'",
            ));
        }

        let mut properties = Mapping::new();
        let mut refs = Vec::new();
        let name = if let Some(sql) = &self.sql {
            properties.insert("sql".into(), sql.clone().into());
            if let Some(connector) = &self.connector {
                properties.insert("connector".into(), connector.clone().into());
            }
            "sql"
        } else if let Some(sql) = &self.metrics_sql {
            properties.insert("sql".into(), sql.clone().into());
            refs.extend(
                metrics_sql_sources(sql)
                    .into_iter()
                    .map(|mv| ResourceName::new(ResourceKind::MetricsView, mv)),
            );
            "metrics_sql"
        } else if let Some(api) = &self.api {
            properties.insert("api".into(), api.clone().into());
            refs.push(ResourceName::new(ResourceKind::Api, api.clone()));
            "api"
        } else if let Some(glob) = &self.glob {
            match glob {
                Value::String(path) => {
                    properties.insert("path".into(), path.clone().into());
                }
                Value::Mapping(map) => properties.extend(map.clone()),
                _ => return Err(KindError::invalid("invalid 'glob': must be a string or a map")),
            }
            if let Some(connector) = &self.connector {
                properties.insert("connector".into(), connector.clone().into());
            }
            "glob"
        } else {
            if let Some(Value::Mapping(map)) = &self.resource_status {
                properties.extend(map.clone());
            }
            "resource_status"
        };
        if let Some(args) = &self.args {
            properties.insert("args".into(), Value::Mapping(args.clone()));
        }
        Ok(Resolver {
            name: name.to_string(),
            properties,
            refs,
        })
    }
}

/// Returns the metrics views a metrics SQL query reads from.
pub(crate) fn metrics_sql_sources(sql: &str) -> Vec<String> {
    static FROM_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = FROM_RE
        .get_or_init(|| Regex::new(r#"(?i)\bfrom\s+"?([A-Za-z_][A-Za-z0-9_:]*)"?"#).ok())
        .as_ref()
    else {
        return Vec::new();
    };
    let mut names: Vec<String> = re
        .captures_iter(sql)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("foo:e1"), "Foo: E1");
        assert_eq!(display_name("orders_daily"), "Orders Daily");
        assert_eq!(display_name("mv1"), "Mv1");
        assert_eq!(display_name("a__b"), "A B");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration(&yaml("30")), Ok(30));
        assert_eq!(parse_duration(&yaml("'45'")), Ok(45));
        assert_eq!(parse_duration(&yaml("5m")), Ok(300));
        assert_eq!(parse_duration(&yaml("1h30m")), Ok(5400));
        assert_eq!(parse_duration(&yaml("1500ms")), Ok(2));
        assert!(parse_duration(&yaml("soon")).is_err());
        assert!(parse_duration(&yaml("5m later")).is_err());
    }

    #[test]
    fn test_default_schedule() {
        let schedule = parse_schedule(None, true).unwrap().unwrap();
        assert!(schedule.ref_update);
        assert!(parse_schedule(None, false).unwrap().is_none());

        let raw: ScheduleYaml = serde_yaml::from_str("cron: '0 * * * *'").unwrap();
        let schedule = parse_schedule(Some(&raw), true).unwrap().unwrap();
        assert!(!schedule.ref_update);
        assert_eq!(schedule.cron.as_deref(), Some("0 * * * *"));

        let raw: ScheduleYaml = serde_yaml::from_str("cron: every day").unwrap();
        assert!(parse_schedule(Some(&raw), true).is_err());
    }

    #[test]
    fn test_field_selector() {
        assert_eq!(FieldSelector::parse(None, "dimensions").unwrap(), FieldSelector::All);
        assert_eq!(
            FieldSelector::parse(Some(&yaml("'*'")), "dimensions").unwrap(),
            FieldSelector::All
        );
        assert_eq!(
            FieldSelector::parse(Some(&yaml("[a, b]")), "dimensions").unwrap(),
            FieldSelector::Names(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            FieldSelector::parse(Some(&yaml("{exclude: [c]}")), "measures").unwrap(),
            FieldSelector::Exclude(vec!["c".into()])
        );
        assert!(FieldSelector::parse(Some(&yaml("7")), "measures").is_err());
    }

    #[test]
    fn test_notifiers() {
        let notify: NotifyYaml =
            serde_yaml::from_str("email:\n  recipients: [a@b.com]\nslack:\n  channels: ['#x']")
                .unwrap();
        let notifiers = parse_notifiers(&notify, &[]).unwrap();
        assert_eq!(notifiers.len(), 2);

        let bad: NotifyYaml = serde_yaml::from_str("email:\n  recipients: [nope]").unwrap();
        assert!(parse_notifiers(&bad, &[]).is_err());

        assert!(parse_notifiers(&notify, &["c@d.com".to_string()]).is_err());
    }

    #[test]
    fn test_resolver() {
        let data: DataYaml =
            serde_yaml::from_str("metrics_sql: SELECT total FROM sales_mv WHERE x > 1").unwrap();
        let resolver = data.resolver().unwrap();
        assert_eq!(resolver.name, "metrics_sql");
        assert_eq!(
            resolver.refs,
            vec![ResourceName::new(ResourceKind::MetricsView, "sales_mv")]
        );

        let both: DataYaml = serde_yaml::from_str("sql: SELECT 1\napi: a").unwrap();
        assert!(both.resolver().is_err());
    }

    #[test]
    fn test_remaining_properties() {
        let config = yaml("type: model\nsql: x\npath: s3://b\nmaterialize: true");
        let props = remaining_properties(&config, &["materialize"]);
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("path"), Some(&yaml("s3://b")));
    }
}
