//! mb-core: shared errors, configuration, and identifiers.
//!
//! This crate is the foundational dependency for the other mb-* crates,
//! providing the unified error type, the JSON application configuration,
//! and the correlation id used to tie log lines to a transcoder process.

pub mod config;
pub mod error;
pub mod ids;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
