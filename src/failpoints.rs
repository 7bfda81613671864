//! Feature-gated failpoint injection for the registry commit path.
//!
//! Compile with `--features failpoints` to enable injection.
//! Without the feature, the `fp!()` macro expands to `Ok(())`.
//!
//! Failpoint names used by [`crate::store::fs`]:
//!
//! - `FP_STORE_AFTER_STAGE`: every new document staged, nothing snapshotted.
//! - `FP_STORE_AFTER_JOURNAL`: snapshot and journal written, no rename yet.
//! - `FP_STORE_MID_SWAP`: after the first staged document was renamed.
//! - `FP_STORE_BEFORE_CLEANUP`: all renames done, journal still present.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

/// Actions a failpoint can take when triggered.
#[derive(Clone, Debug)]
pub enum FailpointAction {
    /// No-op (default).
    Off,
    /// Return an error with the given message.
    Error(String),
    /// Panic with the given message. Simulates a crash that skips cleanup.
    Panic(String),
    /// Abort the process.
    Abort,
}

static REGISTRY: LazyLock<Mutex<HashMap<&'static str, FailpointAction>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

// A panicking failpoint poisons nothing useful; keep going with the data.
fn registry() -> MutexGuard<'static, HashMap<&'static str, FailpointAction>> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Set a failpoint action.
pub fn set(name: &'static str, action: FailpointAction) {
    registry().insert(name, action);
}

/// Clear a specific failpoint.
pub fn clear(name: &'static str) {
    registry().remove(name);
}

/// Clear all failpoints.
pub fn clear_all() {
    registry().clear();
}

/// Check if a failpoint is set and execute its action.
/// Returns `Ok(())` if no failpoint or `Off`, `Err` if `Error` action.
///
/// # Errors
/// Returns the configured message for an `Error` action.
///
/// # Panics
/// Panics if the failpoint action is `Panic`.
pub fn check(name: &str) -> Result<(), String> {
    let action = registry().get(name).cloned();
    match action {
        None | Some(FailpointAction::Off) => Ok(()),
        Some(FailpointAction::Error(msg)) => Err(msg),
        Some(FailpointAction::Panic(msg)) => panic!("failpoint {name}: {msg}"),
        Some(FailpointAction::Abort) => std::process::abort(),
    }
}

/// Failpoint injection point.
///
/// With `failpoints` feature: checks the registry and may return `Err` or panic.
/// Without `failpoints` feature: compiles to `Ok(())`.
///
/// Usage: `fp!("FP_STORE_MID_SWAP")?;`
#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        $crate::failpoints::check($name)
            .map_err(|msg| anyhow::anyhow!("failpoint {}: {}", $name, msg))
    };
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        Ok::<(), anyhow::Error>(())
    };
}
