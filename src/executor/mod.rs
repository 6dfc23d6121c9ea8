#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/*!
Executor module for logic-engine.

This module wires together:
- `state`: execution state, call stack and run bookkeeping
- `events`: observer notifications
- `actions`: leaf actions (keys, mouse, delay, wait-click, text) with dry-run support
- `engine`: trigger detection, the step scheduler and the shared cleanup path

Typical usage:
- Build an `Engine` with `EngineDeps::system(store, guard)`.
- Subscribe to `EngineEvent`s, then call `start_monitoring`.

Example:
```no_run
use std::sync::Arc;
use logic_engine::config::EngineSettings;
use logic_engine::executor::{Engine, EngineDeps};
use logic_engine::guard::ProcessGuard;
use logic_engine::store::MemoryLogicStore;

# async fn run() -> logic_engine::Result<()> {
let store = Arc::new(MemoryLogicStore::default());
let guard = Arc::new(ProcessGuard::system());
let engine = Engine::new(EngineSettings::default(), EngineDeps::system(store, guard));
let mut events = engine.subscribe();
engine.start_monitoring()?;
while let Ok(event) = events.recv().await {
    println!("{event:?}");
}
# Ok(())
# }
```
*/

pub mod actions;
pub mod engine;
pub mod events;
pub mod state;

// Re-exports for convenient access from `logic_engine::executor::*`
pub use actions::{ActionExecutor, EnigoBackend, InputBackend, WaitOutcome};
pub use engine::{DRAIN_BATCH, Engine, EngineDeps};
pub use events::{EngineEvent, EventBus, StopReason};
pub use state::{ExecutionState, MAX_NESTING_DEPTH};
