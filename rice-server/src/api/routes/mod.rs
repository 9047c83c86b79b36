//! Route handlers, one module per resource.

pub mod connections;
pub mod health;
pub mod index;
pub mod ml;
pub mod search;
pub mod settings;
pub mod stores;
