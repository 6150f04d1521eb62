//! Common test utilities for rill-graph integration tests

// Not every helper is used by every test module
#![allow(dead_code)]

use anyhow::Result;
use assert_cmd::Command;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use rill_graph::compiler::{Compiler, CompilerOptions};
use rill_graph::core::ResourceName;
use rill_graph::repo::MemoryRepo;
use rill_graph::test_utils::{ProjectFixture, init_test_logging};

/// Compiles `files` from an in-memory repository with default options.
pub fn compile(files: &[(&str, &str)]) -> (Arc<MemoryRepo>, Compiler) {
    compile_with(files, CompilerOptions::default())
}

pub fn compile_with(files: &[(&str, &str)], options: CompilerOptions) -> (Arc<MemoryRepo>, Compiler) {
    init_test_logging(None);
    let repo = Arc::new(MemoryRepo::from_files(files.iter().copied()));
    let compiler = Compiler::parse(repo.clone(), options).expect("parse should not fail");
    (repo, compiler)
}

/// Renders names as `kind/name` for compact assertions.
pub fn names(names: &[ResourceName]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

/// Every visible resource as `kind/name`.
pub fn visible(compiler: &Compiler) -> Vec<String> {
    compiler.resources().keys().map(ToString::to_string).collect()
}

/// `(path, message)` for every error.
pub fn errors(compiler: &Compiler) -> Vec<(String, String)> {
    compiler
        .errors()
        .iter()
        .map(|e| (e.path.clone(), e.message.clone()))
        .collect()
}

/// A project directory on disk for CLI tests.
pub struct TestProject {
    _temp_dir: TempDir,
    root: std::path::PathBuf,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("project");
        fs::create_dir_all(&root)?;
        Ok(Self {
            _temp_dir: temp_dir,
            root,
        })
    }

    pub fn from_fixture(fixture: &ProjectFixture) -> Result<Self> {
        let project = Self::new()?;
        fixture.write_to(&project.root)?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write(&self, path: &str, contents: &str) -> Result<()> {
        let target = self.root.join(path.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, contents)?;
        Ok(())
    }

    /// The CLI binary, with logging and color environment cleared.
    pub fn cli(&self) -> Command {
        let mut cmd = Command::cargo_bin("rill-graph").expect("binary should be built");
        cmd.env_remove("RUST_LOG")
            .env_remove("RILL_ENVIRONMENT")
            .env_remove("RILL_OLAP_CONNECTOR")
            .env("NO_COLOR", "1");
        cmd
    }
}
