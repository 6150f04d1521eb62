//! Sample projects for tests
//!
//! A [`ProjectFixture`] is a named set of repository files. It can be loaded
//! into a [`MemoryRepo`] for compiler tests or written to a directory for CLI
//! tests.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::repo::MemoryRepo;

/// A set of project files keyed by repository path.
#[derive(Clone, Debug)]
pub struct ProjectFixture {
    pub name: String,
    pub files: Vec<(String, String)>,
}

impl ProjectFixture {
    /// An empty project with only `rill.yaml`.
    pub fn empty() -> Self {
        Self {
            name: "empty".to_string(),
            files: vec![("/rill.yaml".to_string(), String::new())],
        }
    }

    /// A small dashboard project: a source model, a derived model, a metrics
    /// view, an explore and a theme.
    pub fn dashboard() -> Self {
        Self::empty()
            .named("dashboard")
            .with_file(
                "/rill.yaml",
                "display_name: Dashboard\nolap_connector: duckdb\n",
            )
            .with_file(
                "/models/raw_orders.yaml",
                "type: model\nconnector: s3\npath: s3://bucket/orders/*.parquet\n",
            )
            .with_file(
                "/models/orders.sql",
                "-- @materialize: true\nSELECT id, amount, created_at FROM raw_orders\n",
            )
            .with_file(
                "/metrics/orders_metrics.yaml",
                "\
type: metrics_view
model: orders
timeseries: created_at
dimensions:
  - column: id
measures:
  - name: total_amount
    expression: SUM(amount)
explore:
  theme: brand
",
            )
            .with_file("/themes/brand.yaml", "type: theme\ncolors:\n  primary: red\n")
    }

    /// A project whose two models collide on one name.
    pub fn colliding() -> Self {
        Self::empty()
            .named("colliding")
            .with_file("/models/m1.sql", "SELECT 1")
            .with_file("/sources/m1.yaml", "type: model\nconnector: s3\npath: s3://bucket/x.csv\n")
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Adds or replaces a file.
    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        let path = crate::core::normalize_path(path);
        self.files.retain(|(p, _)| *p != path);
        self.files.push((path, contents.to_string()));
        self
    }

    /// Drops a file.
    pub fn without_file(mut self, path: &str) -> Self {
        let path = crate::core::normalize_path(path);
        self.files.retain(|(p, _)| *p != path);
        self
    }

    /// Loads the files into a fresh in-memory repository.
    pub fn memory_repo(&self) -> Arc<MemoryRepo> {
        Arc::new(MemoryRepo::from_files(
            self.files.iter().map(|(p, c)| (p.as_str(), c.as_str())),
        ))
    }

    /// Writes the files below `dir`, creating directories as needed.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        for (path, contents) in &self.files {
            let target = dir.join(path.trim_start_matches('/'));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&target, contents)
                .with_context(|| format!("Failed to write {}", target.display()))?;
        }
        Ok(())
    }
}
