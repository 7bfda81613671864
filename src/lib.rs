//! fpmerge library crate.
//!
//! The primary interface is the `fpmerge` binary. The engine modules are
//! public so integration tests, benches and other tools can run a pass
//! without going through the CLI.

pub mod classify;
pub mod collision;
pub mod config;
pub mod failpoints;
pub mod format;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod rules;
pub mod store;
pub mod telemetry;
pub mod validate;
