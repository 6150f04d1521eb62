//! Test utilities for rill-graph
//!
//! Available to unit tests and, behind the `test-utils` feature, to
//! integration tests.
//!
//! - [`init_test_logging`] wires `tracing` output into the test harness
//! - [`ProjectFixture`] builds sample projects in memory or on disk
//!
//! # Example
//!
//! ```rust,ignore
//! use rill_graph::compiler::{Compiler, CompilerOptions};
//! use rill_graph::test_utils::{ProjectFixture, init_test_logging};
//!
//! #[test]
//! fn test_dashboard() {
//!     init_test_logging(None);
//!     let repo = ProjectFixture::dashboard().memory_repo();
//!     let compiler = Compiler::parse(repo, CompilerOptions::default()).unwrap();
//!     assert!(compiler.errors().is_empty());
//! }
//! ```

pub mod fixtures;

pub use fixtures::ProjectFixture;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::core::{ResourceKind, ResourceName};

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` if given, otherwise `RUST_LOG`. With neither, tests stay
/// silent. Safe to call from every test.
///
/// ```bash
/// RUST_LOG=rill_graph=trace cargo test reparse
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// Shorthand for a [`ResourceName`] in assertions.
pub fn name(kind: ResourceKind, name: &str) -> ResourceName {
    ResourceName::new(kind, name)
}

/// Shorthand for a model name in assertions.
pub fn model(name: &str) -> ResourceName {
    ResourceName::new(ResourceKind::Model, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, CompilerOptions};

    #[test]
    fn test_dashboard_fixture_compiles_cleanly() {
        init_test_logging(None);
        let repo = ProjectFixture::dashboard().memory_repo();
        let compiler = Compiler::parse(repo, CompilerOptions::default()).unwrap();

        assert!(compiler.errors().is_empty(), "{:?}", compiler.errors());
        assert_eq!(compiler.resources().len(), 5);
        let orders = compiler.resource(&model("orders")).unwrap();
        assert_eq!(orders.refs, vec![model("raw_orders")]);
        let explore = compiler
            .resource(&name(ResourceKind::Explore, "orders_metrics"))
            .unwrap();
        assert_eq!(
            explore.refs,
            vec![
                name(ResourceKind::Theme, "brand"),
                name(ResourceKind::MetricsView, "orders_metrics"),
            ]
        );
    }

    #[test]
    fn test_fixture_with_file_replaces() {
        let fixture = ProjectFixture::empty()
            .with_file("models/a.sql", "SELECT 1")
            .with_file("/models/a.sql", "SELECT 2")
            .without_file("/rill.yaml");
        assert_eq!(
            fixture.files,
            vec![("/models/a.sql".to_string(), "SELECT 2".to_string())]
        );
    }
}
