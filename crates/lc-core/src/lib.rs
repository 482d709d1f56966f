//! lc-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for the other lc-* crates,
//! providing type-safe session identifiers, a unified error type, the
//! stream-domain types (requests, statuses, bounded logs), application
//! configuration, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod stream;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use stream::*;
