//! Integration test suite for rill-graph
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **incremental**: reparse, diffs and ref re-resolution
//! - **collisions**: name collisions, shadowing and recovery
//! - **project_config**: `rill.yaml` handling, reloads and layered configuration
//! - **cli**: the `rill-graph` binary

#[path = "../common/mod.rs"]
mod common;

mod cli;
mod collisions;
mod incremental;
mod project_config;
