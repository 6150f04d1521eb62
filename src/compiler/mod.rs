//! The project graph compiler
//!
//! [`Compiler`] ties the pipeline together: it loads the project
//! configuration, groups repository files into stems, builds a node per stem,
//! analyzes it by kind and records the result in the [`ResourceTable`].
//!
//! # Incremental reparse
//!
//! [`Compiler::reparse`] takes the paths that changed since the last call:
//!
//! 1. If the project configuration is among them, the project is rebuilt from
//!    scratch and the diff only reports `reloaded`.
//! 2. If the project has no valid configuration, nothing is done and the diff
//!    reports `skipped`.
//! 3. Otherwise the stems owning the changed paths, plus stems that read a
//!    changed local data file, are rebuilt and re-analyzed.
//! 4. Any stem that depends on a name whose visible resource changed is
//!    re-analyzed too, repeating until no new name changes. Refs without a kind
//!    are resolved against the table afterwards, so a model reading `bar`
//!    picks up a resource named `bar` as soon as one appears.
//! 5. The diff compares visible resources before and after.
//!
//! Work happens on a copy of the compiler state that is swapped in at the
//! end, so a cancelled or failed reparse leaves the compiler untouched.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use rill_graph::compiler::{Compiler, CompilerOptions};
//! use rill_graph::repo::{MemoryRepo, Repo};
//!
//! let repo = Arc::new(MemoryRepo::from_files([
//!     ("rill.yaml", ""),
//!     ("models/foo.sql", "SELECT * FROM bar"),
//! ]));
//! let mut compiler = Compiler::parse(repo.clone(), CompilerOptions::default())?;
//! assert_eq!(compiler.resources().len(), 1);
//!
//! repo.put("/models/bar.sql", "SELECT 1")?;
//! let diff = compiler.reparse(&["/models/bar.sql"])?;
//! assert_eq!(diff.added.len(), 1);
//! assert_eq!(diff.modified.len(), 1); // foo now refs bar
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod diff;
mod graph;

pub use diff::Diff;
pub use graph::DependencyGraph;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::{
    CompilerError, ErrorKind, ParseError, ResourceKind, ResourceName, normalize_path,
};
use crate::kinds::{AnalyzeContext, KindError, ResourceSpec, StaticDrivers, analyze};
use crate::node::{Node, NodeInput, build_node};
use crate::project::{PROJECT_CONFIG_PATHS, ProjectConfig, ProjectError, parse_project_config};
use crate::repo::{Repo, compile_glob, is_glob};
use crate::table::{Resource, ResourceTable};

/// Extensions of files that define resources.
const RESOURCE_EXTENSIONS: [&str; 3] = [".sql", ".yaml", ".yml"];

const DUPLICATE_YML_MESSAGE: &str = "skipping file because a .yaml file with the same name exists";

/// Settings for one compiler instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Active environment, used to pick override blocks (`dev`, `prod`, ...)
    pub environment: String,
    /// OLAP connector used when `rill.yaml` does not set `olap_connector`
    pub default_olap_connector: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            default_olap_connector: "duckdb".to_string(),
        }
    }
}

/// Everything a build produces; cloned and committed as a unit.
#[derive(Debug, Clone, Default)]
struct State {
    environment: String,
    project: Option<ProjectConfig>,
    project_error: Option<ParseError>,
    olap_connector: String,
    drivers: StaticDrivers,
    table: ResourceTable,
    /// Node and analysis errors per stem
    stem_errors: BTreeMap<String, Vec<ParseError>>,
    resources: BTreeMap<ResourceName, Resource>,
    errors: Vec<ParseError>,
}

/// The YAML and SQL files of one stem.
#[derive(Debug, Default)]
struct StemFiles {
    yaml: Option<(String, String)>,
    /// A `.yml` file shadowed by a `.yaml` file of the same stem
    shadowed_yml: Option<String>,
    sql: Option<(String, String)>,
}

/// Compiles a repository into a resource graph and keeps it current.
pub struct Compiler {
    repo: Arc<dyn Repo>,
    options: CompilerOptions,
    state: State,
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("options", &self.options)
            .field("resources", &self.state.resources.len())
            .field("errors", &self.state.errors.len())
            .finish_non_exhaustive()
    }
}

impl Compiler {
    /// Builds the full graph for `repo`.
    pub fn parse(repo: Arc<dyn Repo>, options: CompilerOptions) -> Result<Self, CompilerError> {
        Self::parse_with_cancel(repo, options, &CancellationToken::new())
    }

    /// Like [`Compiler::parse`], giving up with [`CompilerError::Cancelled`]
    /// once `cancel` fires.
    pub fn parse_with_cancel(
        repo: Arc<dyn Repo>,
        options: CompilerOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, CompilerError> {
        let state = build(repo.as_ref(), &options, cancel)?;
        Ok(Self {
            repo,
            options,
            state,
        })
    }

    /// Brings the graph up to date after `paths` changed.
    pub fn reparse<S: AsRef<str>>(&mut self, paths: &[S]) -> Result<Diff, CompilerError> {
        self.reparse_with_cancel(paths, &CancellationToken::new())
    }

    /// Like [`Compiler::reparse`]. On cancellation the compiler keeps its
    /// previous state and [`CompilerError::Cancelled`] is returned.
    pub fn reparse_with_cancel<S: AsRef<str>>(
        &mut self,
        paths: &[S],
        cancel: &CancellationToken,
    ) -> Result<Diff, CompilerError> {
        let paths: BTreeSet<String> = paths.iter().map(|p| normalize_path(p.as_ref())).collect();

        if paths.iter().any(|p| PROJECT_CONFIG_PATHS.contains(&p.as_str())) {
            tracing::info!("Project configuration changed, rebuilding");
            self.state = build(self.repo.as_ref(), &self.options, cancel)?;
            return Ok(Diff::reloaded());
        }
        if self.state.project.is_none() {
            tracing::debug!(paths = paths.len(), "Skipping reparse of unconfigured project");
            return Ok(Diff::skipped());
        }

        let mut state = self.state.clone();
        let before = std::mem::take(&mut state.resources);

        let mut stems = BTreeSet::new();
        for path in &paths {
            if let Some(stem) = stem_of(path) {
                stems.insert(stem.to_string());
            }
            stems.extend(state.table.stems_reading(path));
        }
        if stems.is_empty() {
            state.resources = before;
            return Ok(Diff::default());
        }
        tracing::debug!(paths = paths.len(), stems = stems.len(), "Reparsing");
        process_stems(&mut state, self.repo.as_ref(), stems, cancel)?;

        // Stems depending on a name whose resources changed are analyzed again.
        // A name fires once per distinct state, so this terminates.
        let mut tracker = ChangeTracker::default();
        let mut previous = before.clone();
        loop {
            let current = state.table.resources();
            let dependents: BTreeSet<String> = tracker
                .fire(&previous, &current)
                .iter()
                .flat_map(|name| state.table.dependents_of(name))
                .collect();
            previous = current;
            if dependents.is_empty() {
                break;
            }
            tracing::debug!(count = dependents.len(), "Re-analyzing dependent stems");
            process_stems(&mut state, self.repo.as_ref(), dependents, cancel)?;
        }

        if cancel.is_cancelled() {
            return Err(CompilerError::Cancelled);
        }
        state.refresh();
        let diff = Diff::between(&before, &state.resources);
        self.state = state;
        Ok(diff)
    }

    /// Visible resources by name.
    pub fn resources(&self) -> &BTreeMap<ResourceName, Resource> {
        &self.state.resources
    }

    /// Looks up one visible resource.
    pub fn resource(&self, name: &ResourceName) -> Option<&Resource> {
        self.state.resources.get(name)
    }

    /// Recoverable errors, at most one per path, sorted by path.
    pub fn errors(&self) -> &[ParseError] {
        &self.state.errors
    }

    /// The project configuration, unless it is missing or invalid.
    pub fn project_config(&self) -> Option<&ProjectConfig> {
        self.state.project.as_ref()
    }

    /// The OLAP connector resources default to.
    pub fn olap_connector(&self) -> &str {
        &self.state.olap_connector
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Builds a dependency graph over the visible resources.
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_resources(&self.state.resources)
    }
}

/// Runs a full build.
fn build(
    repo: &dyn Repo,
    options: &CompilerOptions,
    cancel: &CancellationToken,
) -> Result<State, CompilerError> {
    let mut state = State::default();
    state.load_project(repo, options)?;

    let stems: BTreeSet<String> = repo
        .list_glob("/*", true, false)?
        .into_iter()
        .filter(|entry| !PROJECT_CONFIG_PATHS.contains(&entry.path.as_str()))
        .filter(|entry| !is_ignored(state.project.as_ref(), &entry.path))
        .filter_map(|entry| stem_of(&entry.path).map(str::to_string))
        .collect();

    process_stems(&mut state, repo, stems, cancel)?;
    if cancel.is_cancelled() {
        return Err(CompilerError::Cancelled);
    }
    state.refresh();
    tracing::info!(
        resources = state.resources.len(),
        errors = state.errors.len(),
        "Parsed project"
    );
    Ok(state)
}

/// Rebuilds and re-analyzes `stems`.
///
/// Connector stems go first so every other stem sees their drivers.
fn process_stems(
    state: &mut State,
    repo: &dyn Repo,
    stems: BTreeSet<String>,
    cancel: &CancellationToken,
) -> Result<(), CompilerError> {
    let mut nodes = Vec::with_capacity(stems.len());
    for stem in stems {
        if cancel.is_cancelled() {
            return Err(CompilerError::Cancelled);
        }
        state.stem_errors.remove(&stem);

        let files = load_stem(repo, state.project.as_ref(), &stem)?;
        if files.yaml.is_none() && files.sql.is_none() {
            tracing::trace!(stem = %stem, "Stem has no files left");
            state.table.remove(&stem);
            continue;
        }

        let mut errors: Vec<ParseError> = Vec::new();
        if let Some(path) = &files.shadowed_yml {
            errors.push(ParseError::new(path.clone(), ErrorKind::Collision, DUPLICATE_YML_MESSAGE));
        }
        let input = NodeInput {
            yaml_path: files.yaml.as_ref().map(|(p, _)| p.as_str()),
            yaml_text: files.yaml.as_ref().map(|(_, t)| t.as_str()),
            sql_path: files.sql.as_ref().map(|(p, _)| p.as_str()),
            sql_text: files.sql.as_ref().map(|(_, t)| t.as_str()),
            environment: &state.environment,
            default_connector: &state.olap_connector,
        };
        match build_node(&input) {
            Ok(node) => nodes.push((stem.clone(), node)),
            Err(err) => {
                tracing::debug!(stem = %stem, error = %err, "Failed to build node");
                state.table.remove(&stem);
                errors.push(err.into());
            }
        }
        if !errors.is_empty() {
            state.stem_errors.insert(stem, errors);
        }
    }

    let (connectors, others): (Vec<_>, Vec<_>) = nodes
        .into_iter()
        .partition(|(_, node)| node.kind == ResourceKind::Connector);
    for (stem, node) in &connectors {
        state.apply(repo, stem, node);
    }
    state.drivers = state.collect_drivers();
    for (stem, node) in &others {
        if cancel.is_cancelled() {
            return Err(CompilerError::Cancelled);
        }
        state.apply(repo, stem, node);
    }
    Ok(())
}

impl State {
    fn load_project(&mut self, repo: &dyn Repo, options: &CompilerOptions) -> Result<(), CompilerError> {
        self.environment = options.environment.clone();
        for path in PROJECT_CONFIG_PATHS {
            let text = match repo.get(path) {
                Ok(text) => text,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            match parse_project_config(&text, &options.environment) {
                Ok(config) => self.project = Some(config),
                Err(err) => {
                    tracing::warn!(path, error = %err, "Invalid project configuration");
                    self.project_error = Some(
                        ParseError::new(path, ErrorKind::Configuration, err.to_string())
                            .with_line(err.line()),
                    );
                }
            }
            break;
        }
        if self.project.is_none() && self.project_error.is_none() {
            self.project_error = Some(ParseError::new(
                PROJECT_CONFIG_PATHS[0],
                ErrorKind::Configuration,
                ProjectError::NotFound.to_string(),
            ));
        }

        self.olap_connector = self
            .project
            .as_ref()
            .map(|p| p.olap_connector.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| options.default_olap_connector.clone());
        Ok(())
    }

    /// Analyzes a built node and records the outcome for its stem.
    fn apply(&mut self, repo: &dyn Repo, stem: &str, node: &Node) {
        let fallback;
        let project = match &self.project {
            Some(project) => project,
            None => {
                fallback = ProjectConfig::default();
                &fallback
            }
        };
        let ctx = AnalyzeContext {
            project,
            drivers: &self.drivers,
            repo,
            olap_connector: &self.olap_connector,
        };

        match analyze(node, &ctx) {
            Ok(analysis) => {
                if let Err(collision) = self.table.insert(stem, analysis.into()) {
                    tracing::debug!(stem, error = %collision, "Resource name is taken");
                }
            }
            Err(err) => {
                tracing::debug!(stem, error = %err, "Failed to analyze node");
                self.table.remove(stem);
                let path = err.path().unwrap_or(node.primary_path()).to_string();
                let error = ParseError::new(path, error_kind(&err), err.to_string()).with_line(err.line());
                self.stem_errors.entry(stem.to_string()).or_default().push(error);
            }
        }
    }

    /// Connector drivers from `rill.yaml` and connector resources.
    fn collect_drivers(&self) -> StaticDrivers {
        let mut drivers = StaticDrivers::default();
        if let Some(project) = &self.project {
            for connector in &project.connectors {
                if !connector.driver.is_empty() {
                    drivers.insert(connector.name.clone(), connector.driver.clone());
                }
            }
        }
        for resource in self.table.resources().into_values() {
            if let ResourceSpec::Connector(spec) = resource.spec {
                drivers.insert(resource.name.name, spec.driver);
            }
        }
        drivers
    }

    /// Recomputes the resource snapshot and the error list.
    fn refresh(&mut self) {
        self.resources = self.table.resources();

        let mut by_path: BTreeMap<String, ParseError> = BTreeMap::new();
        if let Some(err) = &self.project_error {
            by_path.insert(err.path.clone(), err.clone());
        }
        for err in self.stem_errors.values().flatten() {
            by_path.entry(err.path.clone()).or_insert_with(|| err.clone());
        }
        for err in self.table.collision_errors() {
            by_path.entry(err.path.clone()).or_insert(err);
        }
        self.errors = by_path.into_values().collect();
    }
}

fn error_kind(err: &KindError) -> ErrorKind {
    match err {
        KindError::Decode(_) | KindError::Sql { .. } => ErrorKind::Decode,
        KindError::Template(_) => ErrorKind::Template,
        KindError::Invalid(_) | KindError::Repo(_) => ErrorKind::Analysis,
    }
}

/// Reads the files of `stem`; ignored and missing files are absent.
fn load_stem(
    repo: &dyn Repo,
    project: Option<&ProjectConfig>,
    stem: &str,
) -> Result<StemFiles, CompilerError> {
    let read = |path: String| -> Result<Option<(String, String)>, CompilerError> {
        if is_ignored(project, &path) {
            return Ok(None);
        }
        match repo.get(&path) {
            Ok(text) => Ok(Some((path, text))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    };

    let yaml = read(format!("{stem}.yaml"))?;
    let yml = read(format!("{stem}.yml"))?;
    let (yaml, shadowed_yml) = match (yaml, yml) {
        (Some(yaml), Some((yml_path, _))) => (Some(yaml), Some(yml_path)),
        (Some(yaml), None) => (Some(yaml), None),
        (None, yml) => (yml, None),
    };
    Ok(StemFiles {
        yaml,
        shadowed_yml,
        sql: read(format!("{stem}.sql"))?,
    })
}

/// The stem of a resource file: its path without extension.
fn stem_of(path: &str) -> Option<&str> {
    if PROJECT_CONFIG_PATHS.contains(&path) {
        return None;
    }
    RESOURCE_EXTENSIONS
        .iter()
        .find_map(|ext| path.strip_suffix(ext))
        .filter(|stem| !stem.ends_with('/'))
}

/// Whether `path` falls under one of the project's `ignore_paths`.
fn is_ignored(project: Option<&ProjectConfig>, path: &str) -> bool {
    let Some(project) = project else {
        return false;
    };
    project.ignore_paths.iter().any(|ignore| {
        let ignore = normalize_path(ignore);
        if is_glob(&ignore) {
            return compile_glob(&ignore).is_ok_and(|g| g.matches(path));
        }
        path == ignore || path.starts_with(&format!("{}/", ignore.trim_end_matches('/')))
    })
}

/// Bare lowercased names whose visible resource differs between snapshots.
fn changed_names(
    before: &BTreeMap<ResourceName, Resource>,
    after: &BTreeMap<ResourceName, Resource>,
) -> BTreeSet<String> {
    before
        .keys()
        .chain(after.keys())
        .filter(|name| before.get(*name) != after.get(*name))
        .map(|name| name.name.to_lowercase())
        .collect()
}

/// Remembers which state of each name has already triggered its dependents.
#[derive(Debug, Default)]
struct ChangeTracker {
    fired: Vec<(String, Vec<Resource>)>,
}

impl ChangeTracker {
    /// Names that changed between `previous` and `current` into a state that
    /// has not fired yet.
    fn fire(
        &mut self,
        previous: &BTreeMap<ResourceName, Resource>,
        current: &BTreeMap<ResourceName, Resource>,
    ) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for name in changed_names(previous, current) {
            let snapshot: Vec<Resource> = current
                .iter()
                .filter(|(key, _)| key.name.to_lowercase() == name)
                .map(|(_, resource)| resource.clone())
                .collect();
            if self.fired.iter().any(|(n, s)| *n == name && *s == snapshot) {
                continue;
            }
            self.fired.push((name.clone(), snapshot));
            names.insert(name);
        }
        names
    }
}
