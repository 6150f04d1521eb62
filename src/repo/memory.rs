//! In-memory repository

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Repo, RepoEntry, RepoError, compile_glob, glob_options};
use crate::core::normalize_path;

/// A [`Repo`] backed by an ordered map from path to contents.
///
/// Directories are implicit: a directory exists while any file lives below it.
#[derive(Debug, Default)]
pub struct MemoryRepo {
    files: RwLock<BTreeMap<String, String>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository pre-populated with `(path, contents)` pairs.
    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let map = files
            .into_iter()
            .map(|(path, contents)| (normalize_path(path.as_ref()), contents.into()))
            .collect();
        Self {
            files: RwLock::new(map),
        }
    }

    /// Returns all file paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.files.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Repo for MemoryRepo {
    fn get(&self, path: &str) -> Result<String, RepoError> {
        let path = normalize_path(path);
        self.read()
            .get(&path)
            .cloned()
            .ok_or(RepoError::NotFound { path })
    }

    fn put(&self, path: &str, contents: &str) -> Result<(), RepoError> {
        self.write().insert(normalize_path(path), contents.to_string());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), RepoError> {
        let path = normalize_path(path);
        match self.write().remove(&path) {
            Some(_) => Ok(()),
            None => Err(RepoError::NotFound { path }),
        }
    }

    fn list_glob(
        &self,
        pattern: &str,
        recursive: bool,
        include_dirs: bool,
    ) -> Result<Vec<RepoEntry>, RepoError> {
        let glob = compile_glob(pattern)?;
        let options = glob_options(recursive);
        let files = self.read();

        let mut entries: BTreeMap<String, RepoEntry> = BTreeMap::new();
        for (path, contents) in files.iter() {
            if glob.matches_with(path, options) {
                entries.insert(
                    path.clone(),
                    RepoEntry {
                        path: path.clone(),
                        is_dir: false,
                        size: contents.len() as u64,
                    },
                );
            }
        }

        if include_dirs {
            let dirs: BTreeSet<String> = files.keys().flat_map(|p| parent_dirs(p)).collect();
            for dir in dirs {
                if glob.matches_with(&dir, options) {
                    entries.entry(dir.clone()).or_insert(RepoEntry {
                        path: dir,
                        is_dir: true,
                        size: 0,
                    });
                }
            }
        }

        Ok(entries.into_values().collect())
    }
}

fn parent_dirs(path: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        if idx == 0 {
            break;
        }
        current = &current[..idx];
        dirs.push(current.to_string());
    }
    dirs
}
