//! The Rice server: store lifecycle, runtime settings, connection
//! registry, the HTTP API, and process lifecycle (readiness, drain,
//! ordered shutdown).

pub mod api;
pub mod connections;
pub mod metrics;
pub mod settings;
pub mod state;
pub mod stores;

pub use state::AppState;
