//! Error records for the project compiler
//!
//! Two kinds of failure exist:
//!
//! - **Recoverable, file-attributed errors** ([`ParseError`]) are collected by the
//!   compiler and exposed through [`Compiler::errors`](crate::compiler::Compiler::errors).
//!   They never abort a build; at most one is active per file path.
//! - **Fatal errors** ([`CompilerError`]) are returned as `Err` when the build itself
//!   cannot proceed, for example when the repository cannot be listed or the
//!   caller cancelled the operation.
//!
//! Programming errors (a kind that was never inferred reaching dispatch) panic.

use colored::Colorize;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::core::ResourceKind;
use crate::repo::RepoError;

/// Category of a recoverable parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The project configuration file is missing or invalid
    Configuration,
    /// Malformed YAML or SQL
    Decode,
    /// The kind or connector of a resource could not be determined
    Inference,
    /// Two file sets produce the same resource name
    Collision,
    /// Malformed template syntax or a failing template call
    Template,
    /// A kind analyzer rejected the resource definition
    Analysis,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Decode => "decode",
            ErrorKind::Inference => "inference",
            ErrorKind::Collision => "collision",
            ErrorKind::Template => "template",
            ErrorKind::Analysis => "analysis",
        };
        f.write_str(s)
    }
}

/// Position inside a file, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line: usize,
}

/// A recoverable error attributed to one file.
///
/// `external` is set when the error was discovered while processing a different
/// file than `path`, e.g. the earlier file of a name collision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseError {
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub external: bool,
    pub kind: ErrorKind,
}

impl ParseError {
    pub fn new(path: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            location: None,
            external: false,
            kind,
        }
    }

    #[must_use]
    pub fn with_line(mut self, line: Option<usize>) -> Self {
        self.location = line.map(|line| Location { line });
        self
    }

    #[must_use]
    pub fn external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    /// Renders the error for terminal output, `path:line: message`.
    pub fn display_colored(&self) -> String {
        let location = match self.location {
            Some(loc) => format!("{}:{}", self.path, loc.line),
            None => self.path.clone(),
        };
        let tag = if self.external {
            format!(" ({})", "external".dimmed())
        } else {
            String::new()
        };
        format!(
            "{} {}: {}{}",
            format!("[{}]", self.kind).red().bold(),
            location.bold(),
            self.message,
            tag
        )
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{}:{}: {}", self.path, loc.line, self.message),
            None => write!(f, "{}: {}", self.path, self.message),
        }
    }
}

/// Fatal errors returned by [`Compiler`](crate::compiler::Compiler) operations.
#[derive(Debug, Error)]
pub enum CompilerError {
    /// The repository failed in a way that is not attributable to a single file
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),

    /// The caller cancelled the operation; compiler state is unchanged
    #[error("operation cancelled")]
    Cancelled,
}

/// Error returned when a string does not name a resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindParseError {
    pub value: String,
    pub suggestion: Option<String>,
}

impl KindParseError {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            suggestion: suggest_kind(value),
        }
    }
}

impl fmt::Display for KindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid resource type {:?}", self.value)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean {suggestion:?}?)")?;
        }
        Ok(())
    }
}

impl std::error::Error for KindParseError {}

fn suggest_kind(value: &str) -> Option<String> {
    let value = value.trim().to_lowercase();
    ResourceKind::CONCRETE
        .iter()
        .map(|kind| (strsim::levenshtein(&value, kind.as_str()), kind.as_str()))
        .filter(|(distance, _)| *distance <= 2)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, name)| name.to_string())
}
