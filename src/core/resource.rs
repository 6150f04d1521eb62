//! Resource identity types
//!
//! Every entry in the project graph is identified by a [`ResourceName`], a pair of
//! [`ResourceKind`] and a logical name. Names compare case-insensitively, so
//! `model/Orders` and `model/orders` address the same table slot.
//!
//! # Examples
//!
//! ```rust
//! use rill_graph::core::{ResourceKind, ResourceName};
//!
//! let kind: ResourceKind = "metrics_view".parse().unwrap();
//! assert_eq!(kind, ResourceKind::MetricsView);
//!
//! // Legacy kind names map to their modern equivalent
//! let source: ResourceKind = "source".parse().unwrap();
//! assert_eq!(source, ResourceKind::Model);
//!
//! let a = ResourceName::new(ResourceKind::Model, "Orders");
//! let b = ResourceName::new(ResourceKind::Model, "orders");
//! assert_eq!(a, b);
//! assert_eq!(a.to_string(), "model/Orders");
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::core::KindParseError;

/// Kinds of resources produced by the compiler.
///
/// The declaration order doubles as the resolution priority for references that
/// do not name a kind: a bare `bar` resolves to `model/bar` before
/// `metrics_view/bar`, and so on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Not yet known; only valid on references awaiting resolution
    #[default]
    Unspecified,
    /// A SQL (or connector-driven) data model. Legacy sources are models too.
    Model,
    /// Dimensions and measures over a model or table
    MetricsView,
    /// A dashboard exploring one metrics view
    Explore,
    /// A SQL migration run against the OLAP connector
    Migration,
    /// A scheduled report
    Report,
    /// A scheduled alert
    Alert,
    /// Colors and styling
    Theme,
    /// A chart or widget used on canvases
    Component,
    /// A dashboard made of components
    Canvas,
    /// A custom API endpoint backed by a resolver
    Api,
    /// A named connector with driver and properties
    Connector,
}

impl ResourceKind {
    /// All concrete kinds in resolution-priority order.
    pub const CONCRETE: [ResourceKind; 11] = [
        ResourceKind::Model,
        ResourceKind::MetricsView,
        ResourceKind::Explore,
        ResourceKind::Migration,
        ResourceKind::Report,
        ResourceKind::Alert,
        ResourceKind::Theme,
        ResourceKind::Component,
        ResourceKind::Canvas,
        ResourceKind::Api,
        ResourceKind::Connector,
    ];

    /// Returns the canonical lowercase name used in YAML and in error messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Unspecified => "unspecified",
            ResourceKind::Model => "model",
            ResourceKind::MetricsView => "metrics_view",
            ResourceKind::Explore => "explore",
            ResourceKind::Migration => "migration",
            ResourceKind::Report => "report",
            ResourceKind::Alert => "alert",
            ResourceKind::Theme => "theme",
            ResourceKind::Component => "component",
            ResourceKind::Canvas => "canvas",
            ResourceKind::Api => "api",
            ResourceKind::Connector => "connector",
        }
    }

    /// Returns `true` if the string names the legacy "source" kind.
    ///
    /// Sources are compiled as models, but analyzers still need to know the
    /// resource was declared the old way.
    #[must_use]
    pub fn is_legacy_source(s: &str) -> bool {
        s.trim().eq_ignore_ascii_case("source")
    }

    /// Parses a kind string, treating the empty string as [`ResourceKind::Unspecified`].
    pub fn parse_optional(s: &str) -> Result<ResourceKind, KindParseError> {
        if s.trim().is_empty() {
            return Ok(ResourceKind::Unspecified);
        }
        s.parse()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = KindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "source" | "model" => Ok(ResourceKind::Model),
            "metricsview" | "metrics_view" | "dashboard" => Ok(ResourceKind::MetricsView),
            "explore" => Ok(ResourceKind::Explore),
            "migration" => Ok(ResourceKind::Migration),
            "report" => Ok(ResourceKind::Report),
            "alert" => Ok(ResourceKind::Alert),
            "theme" => Ok(ResourceKind::Theme),
            "component" => Ok(ResourceKind::Component),
            "canvas" => Ok(ResourceKind::Canvas),
            "api" => Ok(ResourceKind::Api),
            "connector" => Ok(ResourceKind::Connector),
            _ => Err(KindParseError::new(s)),
        }
    }
}

/// A `{kind, name}` pair identifying one resource.
///
/// Equality, hashing and ordering ignore the case of `name`; the original
/// spelling is preserved for display. Ordering is by name first so that sorted
/// collections of names read alphabetically, with kind as a tie-breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceName {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceName {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Returns a copy with the name lowercased, the form used for comparison.
    #[must_use]
    pub fn normalized(&self) -> ResourceName {
        ResourceName {
            kind: self.kind,
            name: self.name.to_lowercase(),
        }
    }

    /// Returns `true` if the kind still has to be inferred.
    #[must_use]
    pub fn is_unspecified(&self) -> bool {
        self.kind == ResourceKind::Unspecified
    }

    fn folded(&self) -> impl Iterator<Item = char> + '_ {
        self.name.chars().flat_map(char::to_lowercase)
    }
}

impl PartialEq for ResourceName {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.folded().eq(other.folded())
    }
}

impl Eq for ResourceName {}

impl Hash for ResourceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        for c in self.folded() {
            c.hash(state);
        }
    }
}

impl Ord for ResourceName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded()
            .cmp(other.folded())
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for ResourceName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};

    #[test]
    fn test_kind_from_str_aliases() {
        assert_eq!("MetricsView".parse::<ResourceKind>().unwrap(), ResourceKind::MetricsView);
        assert_eq!("dashboard".parse::<ResourceKind>().unwrap(), ResourceKind::MetricsView);
        assert_eq!("SOURCE".parse::<ResourceKind>().unwrap(), ResourceKind::Model);
        assert_eq!(" api ".parse::<ResourceKind>().unwrap(), ResourceKind::Api);
    }

    #[test]
    fn test_kind_from_str_invalid() {
        let err = "modle".parse::<ResourceKind>().unwrap_err();
        assert_eq!(err.to_string(), r#"invalid resource type "modle" (did you mean "model"?)"#);

        let err = "zzz".parse::<ResourceKind>().unwrap_err();
        assert_eq!(err.to_string(), r#"invalid resource type "zzz""#);
    }

    #[test]
    fn test_parse_optional_empty_is_unspecified() {
        assert_eq!(ResourceKind::parse_optional("").unwrap(), ResourceKind::Unspecified);
        assert_eq!(ResourceKind::parse_optional("  ").unwrap(), ResourceKind::Unspecified);
    }

    #[test]
    fn test_kind_serde_names() {
        let json = serde_json::to_string(&ResourceKind::MetricsView).unwrap();
        assert_eq!(json, "\"metrics_view\"");
        let parsed: ResourceKind = serde_json::from_str("\"connector\"").unwrap();
        assert_eq!(parsed, ResourceKind::Connector);
    }

    #[test]
    fn test_name_case_insensitive_identity() {
        let a = ResourceName::new(ResourceKind::Model, "Orders");
        let b = ResourceName::new(ResourceKind::Model, "ORDERS");
        let c = ResourceName::new(ResourceKind::MetricsView, "orders");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.normalized().name, "orders");
    }

    #[test]
    fn test_name_ordering_is_by_name_then_kind() {
        let names: BTreeSet<_> = [
            ResourceName::new(ResourceKind::MetricsView, "b"),
            ResourceName::new(ResourceKind::Model, "B"),
            ResourceName::new(ResourceKind::Connector, "a"),
        ]
        .into_iter()
        .collect();
        let rendered: Vec<_> = names.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["connector/a", "model/B", "metrics_view/b"]);
    }
}
