//! Repository accessors
//!
//! The compiler never touches the filesystem directly. It reads project files
//! through the [`Repo`] trait, which addresses files by rooted POSIX paths
//! (`/models/orders.sql`) regardless of where or how they are stored.
//!
//! Two implementations are provided:
//! - [`MemoryRepo`] keeps files in an ordered in-memory map (tests, editors)
//! - [`FileRepo`] serves a project directory on disk

mod file;
mod memory;

pub use file::FileRepo;
pub use memory::MemoryRepo;

use sha2::{Digest, Sha256};
use std::io;
use thiserror::Error;

/// Errors raised by repository accessors.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("file not found: {path}")]
    NotFound { path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid glob pattern {pattern:?}: {message}")]
    InvalidGlob { pattern: String, message: String },
}

impl RepoError {
    /// Maps an [`io::Error`] to [`RepoError::NotFound`] or [`RepoError::Io`].
    pub fn from_io(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            RepoError::NotFound {
                path: path.to_string(),
            }
        } else {
            RepoError::Io {
                path: path.to_string(),
                source,
            }
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }
}

/// One entry returned by [`Repo::list_glob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Byte-level file store addressed by rooted POSIX paths.
///
/// Implementations use interior mutability so a single handle can be shared
/// between a compiler and whoever edits the files.
pub trait Repo: Send + Sync {
    /// Returns the contents of `path`, or [`RepoError::NotFound`].
    fn get(&self, path: &str) -> Result<String, RepoError>;

    /// Creates or replaces `path`.
    fn put(&self, path: &str, contents: &str) -> Result<(), RepoError>;

    /// Removes `path`. Removing a missing file is [`RepoError::NotFound`].
    fn delete(&self, path: &str) -> Result<(), RepoError>;

    /// Lists files (and directories, if `include_dirs`) matching `pattern`, sorted by path.
    ///
    /// With `recursive`, `*` may match across `/`; otherwise only `**` crosses
    /// directory boundaries.
    fn list_glob(
        &self,
        pattern: &str,
        recursive: bool,
        include_dirs: bool,
    ) -> Result<Vec<RepoEntry>, RepoError>;

    /// Returns a checksum over the paths and contents of `paths`.
    ///
    /// Missing files are skipped so deleting a file changes the checksum.
    fn hash(&self, paths: &[String]) -> Result<String, RepoError> {
        let mut sorted: Vec<&String> = paths.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut hasher = Sha256::new();
        for path in sorted {
            match self.get(path) {
                Ok(contents) => {
                    hasher.update(path.as_bytes());
                    hasher.update([0u8]);
                    hasher.update(contents.as_bytes());
                    hasher.update([0u8]);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Builds a [`glob::Pattern`] for repository paths.
pub(crate) fn compile_glob(pattern: &str) -> Result<glob::Pattern, RepoError> {
    let rooted = crate::core::normalize_path(pattern);
    glob::Pattern::new(&rooted).map_err(|e| RepoError::InvalidGlob {
        pattern: pattern.to_string(),
        message: e.msg.to_string(),
    })
}

pub(crate) fn glob_options(recursive: bool) -> glob::MatchOptions {
    glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: !recursive,
        require_literal_leading_dot: false,
    }
}

/// Returns `true` if `s` contains glob metacharacters.
#[must_use]
pub fn is_glob(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_changes_with_content_and_deletion() {
        let repo = MemoryRepo::new();
        repo.put("/data/a.csv", "1,2").unwrap();
        repo.put("/data/b.csv", "3,4").unwrap();
        let paths = vec!["/data/a.csv".to_string(), "/data/b.csv".to_string()];

        let first = repo.hash(&paths).unwrap();
        assert_eq!(first, repo.hash(&paths).unwrap());

        repo.put("/data/a.csv", "1,3").unwrap();
        let second = repo.hash(&paths).unwrap();
        assert_ne!(first, second);

        repo.delete("/data/b.csv").unwrap();
        assert_ne!(second, repo.hash(&paths).unwrap());
    }

    #[test]
    fn test_hash_ignores_order() {
        let repo = MemoryRepo::from_files([("/a", "x"), ("/b", "y")]);
        let forward = repo.hash(&["/a".into(), "/b".into()]).unwrap();
        let backward = repo.hash(&["/b".into(), "/a".into()]).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_is_glob() {
        assert!(is_glob("data/*.csv"));
        assert!(is_glob("data/file?.csv"));
        assert!(!is_glob("data/file.csv"));
    }

    #[test]
    fn test_invalid_glob() {
        let err = compile_glob("/data/[").unwrap_err();
        assert!(matches!(err, RepoError::InvalidGlob { .. }));
    }
}
