//! The resource table
//!
//! Maps every [`ResourceName`] to the resource currently visible under it. Each
//! stem *claims* the names its analysis produced; a name is a small state
//! machine over its claims:
//!
//! - **Absent**: no claims.
//! - **Single**: exactly one declared claim, or only implicit claims. The
//!   winner is visible.
//! - **Colliding**: two or more declared claims. The claim with the smallest
//!   stem stays visible and every declared claimant's files carry a
//!   `name collision` error.
//!
//! Implicit claims (resources emitted automatically, such as the explore of a
//! legacy metrics view) never collide; they yield to any declared claim and
//! come back on their own once it disappears. Since the state is a pure
//! function of the current claims, removing a claim restores whatever the
//! remaining claims imply.
//!
//! The table also owns two secondary indices, updated together with the claims:
//! local data files that feed a stem's analysis, and the names a stem depends
//! on without naming a kind (candidates for re-resolution).
//!
//! # Examples
//!
//! ```rust
//! use rill_graph::core::{ResourceKind, ResourceName};
//! use rill_graph::kinds::{ResourceDraft, ResourceSpec, ThemeSpec};
//! use rill_graph::table::{ResourceTable, StemAnalysis};
//!
//! let draft = |stem: &str| ResourceDraft {
//!     name: ResourceName::new(ResourceKind::Theme, "brand"),
//!     paths: vec![format!("{stem}.yaml")],
//!     refs: Vec::new(),
//!     spec: ResourceSpec::Theme(ThemeSpec::default()),
//!     implicit: false,
//! };
//!
//! let mut table = ResourceTable::new();
//! table.insert("/themes/brand", StemAnalysis::new(vec![draft("/themes/brand")]))?;
//! assert!(table.insert("/themes/z/brand", StemAnalysis::new(vec![draft("/themes/z/brand")])).is_err());
//! assert_eq!(table.collision_errors().len(), 2);
//!
//! table.remove("/themes/brand");
//! let brand = table.lookup(&ResourceName::new(ResourceKind::Theme, "brand")).unwrap();
//! assert_eq!(brand.paths, vec!["/themes/z/brand.yaml"]);
//! assert!(table.collision_errors().is_empty());
//! # Ok::<(), rill_graph::table::TableError>(())
//! ```

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, trace};

use crate::core::{ErrorKind, ParseError, ResourceKind, ResourceName};
use crate::kinds::{Analysis, ResourceDraft, ResourceSpec};

/// Message attached to every file involved in a name collision.
pub const COLLISION_MESSAGE: &str = "name collision";

/// A resource as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub name: ResourceName,
    /// Files that produced the resource, sorted
    pub paths: Vec<String>,
    /// Resolved dependencies, sorted and unique
    pub refs: Vec<ResourceName>,
    pub spec: ResourceSpec,
}

/// Errors returned by [`ResourceTable::insert`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// The stem's claim was recorded but another stem holds the name.
    #[error("name collision: {name} is also defined by {}", .winner.join(", "))]
    Collision {
        name: ResourceName,
        winner: Vec<String>,
    },
}

/// What a stem contributes to the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StemAnalysis {
    pub drafts: Vec<ResourceDraft>,
    pub data_paths: Vec<String>,
    pub watched: Vec<String>,
}

impl StemAnalysis {
    pub fn new(drafts: Vec<ResourceDraft>) -> Self {
        Self {
            drafts,
            ..Default::default()
        }
    }
}

impl From<Analysis> for StemAnalysis {
    fn from(analysis: Analysis) -> Self {
        Self {
            drafts: analysis.drafts,
            data_paths: analysis.data_paths,
            watched: analysis.watched,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Claim {
    stem: String,
    draft: ResourceDraft,
}

impl Claim {
    /// Declared claims first, then by stem.
    fn precedence(&self) -> (bool, &str) {
        (self.draft.implicit, &self.stem)
    }
}

/// How a name is currently held.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SlotState<'a> {
    Absent,
    Single(&'a Claim),
    Colliding {
        winner: &'a Claim,
        declared: &'a [Claim],
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
struct StemEntry {
    names: Vec<ResourceName>,
    data_paths: Vec<String>,
    candidates: BTreeSet<String>,
}

/// Claims, visibility and reverse indices for all resources of a project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceTable {
    /// Keyed by normalized name; claims kept in precedence order
    slots: BTreeMap<ResourceName, Vec<Claim>>,
    stems: BTreeMap<String, StemEntry>,
    /// Local data path to the stems whose analysis read it
    data_paths: BTreeMap<String, BTreeSet<String>>,
    /// Lowercased bare name to the stems that depend on whatever it resolves to
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records everything `stem` produced, replacing its previous contribution.
    ///
    /// Claims are always recorded. If one of them loses a collision the first
    /// such collision is returned; the table stays consistent either way.
    pub fn insert(&mut self, stem: &str, analysis: StemAnalysis) -> Result<(), TableError> {
        self.remove(stem);

        let mut entry = StemEntry {
            data_paths: analysis.data_paths,
            candidates: analysis.watched.iter().map(|w| w.to_lowercase()).collect(),
            ..Default::default()
        };
        let mut collision = None;

        for draft in analysis.drafts {
            let key = draft.name.normalized();
            if entry.names.contains(&key) {
                debug!(stem = %stem, name = %draft.name, "Ignoring duplicate resource from one stem");
                continue;
            }
            entry.candidates.extend(
                draft
                    .refs
                    .iter()
                    .filter(|r| r.is_unspecified())
                    .map(|r| r.name.to_lowercase()),
            );

            let claims = self.slots.entry(key.clone()).or_default();
            claims.push(Claim {
                stem: stem.to_string(),
                draft,
            });
            claims.sort_by(|a, b| a.precedence().cmp(&b.precedence()));
            entry.names.push(key.clone());

            if let SlotState::Colliding { winner, .. } = slot_state(claims) {
                if winner.stem != stem && collision.is_none() {
                    let lost = claims.iter().any(|c| c.stem == stem && !c.draft.implicit);
                    if lost {
                        collision = Some(TableError::Collision {
                            name: winner.draft.name.clone(),
                            winner: winner.draft.paths.clone(),
                        });
                    }
                }
            }
        }

        for path in &entry.data_paths {
            self.data_paths
                .entry(path.clone())
                .or_default()
                .insert(stem.to_string());
        }
        for name in &entry.candidates {
            self.dependents
                .entry(name.clone())
                .or_default()
                .insert(stem.to_string());
        }
        trace!(stem = %stem, names = entry.names.len(), "Inserted stem");
        self.stems.insert(stem.to_string(), entry);

        match collision {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drops every claim and index entry of `stem`; returns the names it claimed.
    pub fn remove(&mut self, stem: &str) -> Vec<ResourceName> {
        let Some(entry) = self.stems.remove(stem) else {
            return Vec::new();
        };
        for key in &entry.names {
            if let Some(claims) = self.slots.get_mut(key) {
                claims.retain(|c| c.stem != stem);
                if claims.is_empty() {
                    self.slots.remove(key);
                }
            }
        }
        for path in &entry.data_paths {
            remove_from_index(&mut self.data_paths, path, stem);
        }
        for name in &entry.candidates {
            remove_from_index(&mut self.dependents, name, stem);
        }
        entry.names
    }

    /// Returns the visible resource for `name`, with refs resolved.
    pub fn lookup(&self, name: &ResourceName) -> Option<Resource> {
        self.visible(name).map(|claim| self.materialize(claim))
    }

    /// Returns `true` if some resource is visible under `name`.
    pub fn contains(&self, name: &ResourceName) -> bool {
        self.visible(name).is_some()
    }

    /// All visible resources, keyed by name.
    pub fn resources(&self) -> BTreeMap<ResourceName, Resource> {
        self.slots
            .values()
            .filter_map(|claims| winner(claims))
            .map(|claim| (claim.draft.name.clone(), self.materialize(claim)))
            .collect()
    }

    /// `name collision` errors for every declared claimant of a colliding name.
    ///
    /// Files of the visible claimant are marked external: the conflict was
    /// caused by another file.
    pub fn collision_errors(&self) -> Vec<ParseError> {
        let mut errors: BTreeMap<String, ParseError> = BTreeMap::new();
        for claims in self.slots.values() {
            let SlotState::Colliding { winner, declared } = slot_state(claims) else {
                continue;
            };
            for claim in declared {
                let external = claim.stem == winner.stem;
                for path in &claim.draft.paths {
                    errors.entry(path.clone()).or_insert_with(|| {
                        ParseError::new(path.clone(), ErrorKind::Collision, COLLISION_MESSAGE)
                            .external(external)
                    });
                }
            }
        }
        errors.into_values().collect()
    }

    /// The names `stem` currently claims.
    pub fn names_of(&self, stem: &str) -> &[ResourceName] {
        self.stems.get(stem).map_or(&[], |e| e.names.as_slice())
    }

    /// Stems currently recorded, sorted.
    pub fn stems(&self) -> impl Iterator<Item = &str> {
        self.stems.keys().map(String::as_str)
    }

    /// Stems whose analysis read the local data file at `path`.
    pub fn stems_reading(&self, path: &str) -> BTreeSet<String> {
        self.data_paths.get(path).cloned().unwrap_or_default()
    }

    /// Stems whose output depends on what the bare `name` resolves to.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        self.dependents
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Picks the visible resource an unqualified ref names, in kind priority order.
    pub fn resolve_unspecified(&self, name: &str, from: &ResourceName) -> Option<ResourceName> {
        ResourceKind::CONCRETE
            .iter()
            .map(|kind| ResourceName::new(*kind, name))
            .filter(|candidate| candidate != from)
            .find_map(|candidate| self.visible(&candidate).map(|c| c.draft.name.clone()))
    }

    fn visible(&self, name: &ResourceName) -> Option<&Claim> {
        self.slots.get(&name.normalized()).and_then(|c| winner(c))
    }

    fn materialize(&self, claim: &Claim) -> Resource {
        let draft = &claim.draft;
        let refs: BTreeSet<ResourceName> = draft
            .refs
            .iter()
            .filter_map(|r| {
                if r.is_unspecified() {
                    self.resolve_unspecified(&r.name, &draft.name)
                } else {
                    Some(r.clone())
                }
            })
            .filter(|r| *r != draft.name)
            .collect();
        let mut paths = draft.paths.clone();
        paths.sort();
        paths.dedup();
        Resource {
            name: draft.name.clone(),
            paths,
            refs: refs.into_iter().collect(),
            spec: draft.spec.clone(),
        }
    }
}

fn slot_state(claims: &[Claim]) -> SlotState<'_> {
    let declared_count = claims.iter().take_while(|c| !c.draft.implicit).count();
    match claims.first() {
        None => SlotState::Absent,
        Some(winner) if declared_count >= 2 => SlotState::Colliding {
            winner,
            declared: &claims[..declared_count],
        },
        Some(winner) => SlotState::Single(winner),
    }
}

fn winner(claims: &[Claim]) -> Option<&Claim> {
    match slot_state(claims) {
        SlotState::Absent => None,
        SlotState::Single(claim) | SlotState::Colliding { winner: claim, .. } => Some(claim),
    }
}

fn remove_from_index(index: &mut BTreeMap<String, BTreeSet<String>>, key: &str, stem: &str) {
    if let Some(stems) = index.get_mut(key) {
        stems.remove(stem);
        if stems.is_empty() {
            index.remove(key);
        }
    }
}
