//! Workspace-level integration test package; see `tests/`.
