//! Command-line interface for rill-graph.
//!
//! The binary compiles a project directory and reports what it found:
//!
//! - `parse` - List every resource and every parse error
//! - `graph` - Print resources in dependency order and report cycles
//!
//! # Global Options
//!
//! - `--verbose` - Enable debug logging
//! - `--quiet` - Only log errors
//!
//! `RUST_LOG` takes precedence over both flags when set.
//!
//! # Examples
//!
//! ```bash
//! rill-graph parse ./my-project
//! rill-graph parse ./my-project --environment prod --format json
//! rill-graph --verbose graph ./my-project
//! ```

mod graph;
mod parse;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::compiler::{Compiler, CompilerOptions};
use crate::repo::FileRepo;

pub use graph::GraphCommand;
pub use parse::ParseCommand;

/// Top-level command line.
#[derive(Parser, Debug)]
#[command(
    name = "rill-graph",
    about = "Compile a Rill project into a resource graph",
    version,
    long_about = "rill-graph parses the YAML and SQL files of a Rill project, infers refs between \
                  resources and reports resources and errors."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a project and list its resources and errors
    Parse(ParseCommand),

    /// Print resources in dependency order
    Graph(GraphCommand),
}

/// Output format for command results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, colored text
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Options shared by every command that compiles a project.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Project directory containing rill.yaml
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Environment whose overrides apply
    #[arg(long, env = "RILL_ENVIRONMENT", default_value = "dev")]
    pub environment: String,

    /// OLAP connector used when rill.yaml does not set one
    #[arg(long, env = "RILL_OLAP_CONNECTOR", default_value = "duckdb")]
    pub olap_connector: String,
}

impl ProjectArgs {
    /// Compiles the project directory.
    pub fn compile(&self) -> Result<Compiler> {
        if !self.dir.is_dir() {
            anyhow::bail!("project directory {} does not exist", self.dir.display());
        }
        let repo = Arc::new(FileRepo::new(&self.dir));
        let options = CompilerOptions {
            environment: self.environment.clone(),
            default_olap_connector: self.olap_connector.clone(),
        };
        Compiler::parse(repo, options)
            .with_context(|| format!("failed to parse project at {}", self.dir.display()))
    }
}

impl Cli {
    /// The log filter implied by the verbosity flags.
    #[must_use]
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }

    /// Installs the global tracing subscriber, writing to stderr.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_filter()));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Runs the selected command.
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Parse(cmd) => cmd.execute(),
            Commands::Graph(cmd) => cmd.execute(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_flags() {
        let cli = Cli::parse_from(["rill-graph", "--verbose", "parse", "."]);
        assert_eq!(cli.log_filter(), "debug");

        let cli = Cli::parse_from(["rill-graph", "parse", ".", "-q"]);
        assert_eq!(cli.log_filter(), "error");

        let cli = Cli::parse_from(["rill-graph", "graph"]);
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["rill-graph", "-v", "-q", "parse"]).is_err());
    }

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::parse_from([
            "rill-graph",
            "parse",
            "proj",
            "--environment",
            "prod",
            "--format",
            "json",
            "--strict",
        ]);
        let Commands::Parse(cmd) = cli.command else {
            panic!("expected parse");
        };
        assert_eq!(cmd.project.dir, PathBuf::from("proj"));
        assert_eq!(cmd.project.environment, "prod");
        assert_eq!(cmd.format, OutputFormat::Json);
        assert!(cmd.strict);
    }
}
