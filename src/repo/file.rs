//! Directory-backed repository

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

use super::{Repo, RepoEntry, RepoError, compile_glob, glob_options};
use crate::core::normalize_path;

/// A [`Repo`] serving the files below a project directory.
///
/// Hidden directories (`.git`, `.rill`, ...) are never listed.
#[derive(Debug, Clone)]
pub struct FileRepo {
    root: PathBuf,
}

impl FileRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let normalized = normalize_path(path);
        self.root.join(normalized.trim_start_matches('/'))
    }

    fn to_repo_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Some(normalize_path(&joined))
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

impl Repo for FileRepo {
    fn get(&self, path: &str) -> Result<String, RepoError> {
        let full = self.resolve(path);
        trace!(path = %full.display(), "Reading file");
        fs::read_to_string(&full).map_err(|e| RepoError::from_io(&normalize_path(path), e))
    }

    fn put(&self, path: &str, contents: &str) -> Result<(), RepoError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| RepoError::from_io(path, e))?;
        }
        fs::write(&full, contents).map_err(|e| RepoError::from_io(path, e))
    }

    fn delete(&self, path: &str) -> Result<(), RepoError> {
        let full = self.resolve(path);
        fs::remove_file(&full).map_err(|e| RepoError::from_io(&normalize_path(path), e))
    }

    fn list_glob(
        &self,
        pattern: &str,
        recursive: bool,
        include_dirs: bool,
    ) -> Result<Vec<RepoEntry>, RepoError> {
        let glob = compile_glob(pattern)?;
        let options = glob_options(recursive);

        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_hidden(e));
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
                RepoError::Io { path, source }
            })?;
            if entry.depth() == 0 {
                continue;
            }
            let is_dir = entry.file_type().is_dir();
            if is_dir && !include_dirs {
                continue;
            }
            let Some(path) = self.to_repo_path(entry.path()) else {
                continue;
            };
            if !glob.matches_with(&path, options) {
                continue;
            }
            let size = if is_dir {
                0
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            };
            entries.push(RepoEntry { path, is_dir, size });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(pattern, count = entries.len(), "Listed repository files");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_repo_roundtrip() {
        let temp = TempDir::new().unwrap();
        let repo = FileRepo::new(temp.path());

        repo.put("/models/a.sql", "SELECT 1").unwrap();
        assert_eq!(repo.get("models/a.sql").unwrap(), "SELECT 1");
        assert!(temp.path().join("models/a.sql").exists());

        repo.delete("/models/a.sql").unwrap();
        assert!(repo.get("/models/a.sql").unwrap_err().is_not_found());
    }

    #[test]
    fn test_file_repo_skips_hidden_dirs() {
        let temp = TempDir::new().unwrap();
        let repo = FileRepo::new(temp.path());
        repo.put("/models/a.sql", "SELECT 1").unwrap();
        repo.put("/.git/config.yaml", "x: 1").unwrap();
        repo.put("/rill.yaml", "olap_connector: duckdb").unwrap();

        let entries = repo.list_glob("/**/*", false, false).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/models/a.sql", "/rill.yaml"]);
    }

    #[test]
    fn test_file_repo_lists_dirs_on_request() {
        let temp = TempDir::new().unwrap();
        let repo = FileRepo::new(temp.path());
        repo.put("/models/a.sql", "SELECT 1").unwrap();

        let entries = repo.list_glob("/*", false, true).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].path, "/models");
    }
}
