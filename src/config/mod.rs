//! Configuration for lock timing.
//!
//! This module defines the [`LockConfig`] struct, which can be loaded from a
//! YAML file. It supports forward-compatible YAML parsing (unknown fields are
//! ignored), sensible defaults for every field, and validation of values.

mod model;
mod operations;
pub(crate) mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use model::LockConfig;
