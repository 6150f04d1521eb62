//! Change sets produced by a reparse

use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::ResourceName;
use crate::table::Resource;

/// What one call to [`Compiler::reparse`](super::Compiler::reparse) changed.
///
/// The three buckets are sorted by name. When `reloaded` is set the whole
/// project was rebuilt and the buckets are empty: callers should re-read every
/// resource. `skipped` means nothing was done because the project has no
/// valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub added: Vec<ResourceName>,
    pub modified: Vec<ResourceName>,
    pub deleted: Vec<ResourceName>,
    pub reloaded: bool,
    pub skipped: bool,
}

impl Diff {
    /// A diff reporting a full rebuild.
    pub fn reloaded() -> Self {
        Self {
            reloaded: true,
            ..Default::default()
        }
    }

    /// A diff reporting that no work was done.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    /// Compares two snapshots of the visible resources.
    pub fn between(
        before: &BTreeMap<ResourceName, Resource>,
        after: &BTreeMap<ResourceName, Resource>,
    ) -> Self {
        let mut diff = Diff::default();
        for (name, resource) in after {
            match before.get(name) {
                None => diff.added.push(resource.name.clone()),
                Some(old) if old != resource => diff.modified.push(resource.name.clone()),
                Some(_) => {}
            }
        }
        diff.deleted = before
            .iter()
            .filter(|(name, _)| !after.contains_key(*name))
            .map(|(_, resource)| resource.name.clone())
            .collect();
        diff
    }

    /// Returns `true` if nothing changed and no flag is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && !self.reloaded
            && !self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceKind;
    use crate::kinds::{ResourceSpec, ThemeSpec};

    fn theme(name: &str, primary: Option<&str>) -> (ResourceName, Resource) {
        let name = ResourceName::new(ResourceKind::Theme, name);
        let resource = Resource {
            name: name.clone(),
            paths: vec![format!("/themes/{}.yaml", name.name)],
            refs: Vec::new(),
            spec: ResourceSpec::Theme(ThemeSpec {
                primary_color: primary.map(str::to_string),
                secondary_color: None,
            }),
        };
        (name, resource)
    }

    #[test]
    fn test_between_buckets_sorted() {
        let before: BTreeMap<_, _> = [theme("b", None), theme("d", None), theme("e", None)]
            .into_iter()
            .collect();
        let after: BTreeMap<_, _> = [
            theme("e", None),
            theme("c", None),
            theme("a", None),
            theme("d", Some("red")),
        ]
        .into_iter()
        .collect();

        let diff = Diff::between(&before, &after);
        let names = |v: &[ResourceName]| v.iter().map(|n| n.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&diff.added), vec!["a", "c"]);
        assert_eq!(names(&diff.modified), vec!["d"]);
        assert_eq!(names(&diff.deleted), vec!["b"]);
        assert!(!diff.reloaded && !diff.skipped);
    }

    #[test]
    fn test_empty() {
        let snapshot: BTreeMap<_, _> = [theme("a", None)].into_iter().collect();
        assert!(Diff::between(&snapshot, &snapshot).is_empty());
        assert!(!Diff::reloaded().is_empty());
        assert!(!Diff::skipped().is_empty());
    }
}
