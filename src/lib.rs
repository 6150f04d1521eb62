//! rill-graph - an incremental project-graph compiler
//!
//! rill-graph reads a declarative analytics project (a directory of YAML and
//! SQL files plus a `rill.yaml` project file) and compiles it into a graph of
//! named, typed resources: models, metrics views, explores, dashboards,
//! reports, alerts, themes, APIs, connectors and migrations.
//!
//! # Architecture Overview
//!
//! Compilation is a pipeline with one stage per module:
//!
//! 1. [`repo`] lists and reads project files ([`repo::FileRepo`] on disk,
//!    [`repo::MemoryRepo`] in tests).
//! 2. [`project`] parses `rill.yaml`: connectors, variables, per-kind defaults
//!    and environment overrides.
//! 3. [`node`] groups the files of one *stem* (`/models/orders.yaml` and
//!    `/models/orders.sql`) into a kind-agnostic node, after expanding
//!    templates ([`templating`]) and reading SQL annotations ([`sql`]).
//! 4. [`kinds`] validates a node against its kind and produces typed
//!    resource specs plus their refs.
//! 5. [`table`] stores resources by name, detects name collisions and resolves
//!    refs whose kind was not given.
//! 6. [`compiler`] drives the pipeline and, on [`compiler::Compiler::reparse`],
//!    recomputes only what changed and reports a [`compiler::Diff`].
//!
//! Shared types live in [`core`]; YAML helpers in [`utils`]; the command-line
//! front end in [`cli`].
//!
//! # Errors
//!
//! Problems in individual files never abort a build. They are collected as
//! [`core::ParseError`] records, one per path, while the rest of the project
//! still compiles. Only repository failures and cancellation surface as
//! [`core::CompilerError`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rill_graph::compiler::{Compiler, CompilerOptions};
//! use rill_graph::core::{ResourceKind, ResourceName};
//! use rill_graph::repo::MemoryRepo;
//!
//! let repo = Arc::new(MemoryRepo::from_files([
//!     ("rill.yaml", "olap_connector: duckdb"),
//!     ("models/orders.sql", "SELECT * FROM raw_orders"),
//!     ("models/raw_orders.sql", "SELECT 1 AS id"),
//! ]));
//! let compiler = Compiler::parse(repo, CompilerOptions::default())?;
//!
//! let orders = compiler
//!     .resource(&ResourceName::new(ResourceKind::Model, "orders"))
//!     .expect("orders is defined");
//! assert_eq!(orders.refs, vec![ResourceName::new(ResourceKind::Model, "raw_orders")]);
//! # Ok::<(), rill_graph::core::CompilerError>(())
//! ```

pub mod cli;
pub mod compiler;
pub mod core;
pub mod kinds;
pub mod node;
pub mod project;
pub mod repo;
pub mod sql;
pub mod table;
pub mod templating;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
