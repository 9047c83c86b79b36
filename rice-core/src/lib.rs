//! Core types and abstractions for the Rice hybrid code-search engine.
//!
//! This crate provides the shared domain model (stores, documents, chunks,
//! vectors, connections), the error taxonomy, deterministic identifiers,
//! wire payloads, and the layered process configuration used across all
//! Rice components.

pub mod config;
pub mod error;
pub mod id;
pub mod protocol;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::MlBackend;
pub use types::*;

/// Re-export commonly used items.
pub mod prelude {
    pub use crate::config::RiceConfig;
    pub use crate::error::{Error, Result};
    pub use crate::traits::MlBackend;
    pub use crate::types::*;
}
