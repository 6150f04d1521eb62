//! Shared helpers
//!
//! - [`yaml`] - layering of YAML trees and error-location extraction

pub mod yaml;
