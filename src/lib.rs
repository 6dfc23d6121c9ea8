#![cfg_attr(not(windows), forbid(unsafe_code))]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! logic-engine: hotkey-triggered replay of recorded input sequences ("Logics").
//!
//! A released hotkey starts a Logic; the engine replays its items one per
//! scheduler tick against the bound target process, handles nested Logics and
//! repeats, and on any stop or failure releases every held key.
//!
//! Modules:
//! - `config`: Logic data model, settings, loader and schema helpers.
//! - `input`: keyboard hook, key normalization, key state and synthesis.
//! - `guard`: target-process binding and foreground checks.
//! - `store`: Logic lookup and config reloading.
//! - `executor`: execution state, actions and the engine itself.
//! - `utils`: window geometry helpers.
//!
//! Use `logic_engine::prelude::*` to bring commonly used items into scope quickly.

/// Public module: configuration (models, loader, schema helpers).
pub mod config;
/// Public module: engine error taxonomy.
pub mod error;
/// Public module: execution engine (state, actions, engine).
pub mod executor;
/// Public module: process guard.
pub mod guard;
/// Public module: keyboard input (hook, keys, state, synthesis).
pub mod input;
/// Public module: Logic store.
pub mod store;
/// Public module: utilities (window helpers).
pub mod utils;

pub use error::{EngineError, Result};

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Initialize tracing (logging).
/// - `level` (e.g. from `--log-level`) wins over `RUST_LOG`.
/// - Falls back to `info`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing(level: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));

    // Ignore the error if the global subscriber was already set.
    let _ = fmt().with_env_filter(filter).try_init();
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use logic_engine::prelude::*;`
pub mod prelude {
    // Tracing macros
    pub use tracing::{debug, error, info, instrument, trace, warn};

    // Timing helpers
    pub use std::time::Duration;
    pub use tokio::time::sleep;

    // Core types
    pub use crate::config::{AppConfig, EngineSettings, KeyBinding, Logic, LogicItem};
    pub use crate::executor::{Engine, EngineDeps, EngineEvent, ExecutionState, StopReason};
    pub use crate::guard::{ProcessGuard, ProcessHandle};
    pub use crate::input::{KeyEvent, ManualHook};
    pub use crate::store::{LogicStore, MemoryLogicStore};
    pub use crate::{EngineError, Result};

    // External crates (namespaced) if callers want direct access
    pub use crate as logic_engine;
    pub use enigo;

    // Frequently used internal modules
    pub use crate::{config, executor, guard, input, store, utils};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_accepts_bad_filter_and_repeats() {
        init_tracing(Some("logic_engine=[not a filter"));
        init_tracing(Some("debug"));
        init_tracing(None);
        assert!(!version().is_empty());
    }
}
