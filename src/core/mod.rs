//! Core types shared by every stage of the compiler
//!
//! - [`resource`] defines resource identity: [`ResourceKind`] and [`ResourceName`].
//! - [`error`] defines the recoverable [`ParseError`] record collected per file and
//!   the fatal [`CompilerError`] returned when a build cannot proceed.

pub mod error;
pub mod resource;

pub use error::{CompilerError, ErrorKind, KindParseError, Location, ParseError};
pub use resource::{ResourceKind, ResourceName};

/// Normalizes a repository path to the rooted POSIX form used as a key everywhere.
///
/// ```rust
/// use rill_graph::core::normalize_path;
///
/// assert_eq!(normalize_path("models/m1.sql"), "/models/m1.sql");
/// assert_eq!(normalize_path("/models//m1.sql"), "/models/m1.sql");
/// assert_eq!(normalize_path("models\\m1.sql"), "/models/m1.sql");
/// ```
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let segments: Vec<&str> = unified
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", segments.join("/"))
}
