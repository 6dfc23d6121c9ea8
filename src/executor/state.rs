//! Execution state and call stack.
//!
//! `RunState` is the single unit guarded by the engine's run lock: the
//! observable [`ExecutionState`], the active Logic, the call stack, the run id
//! and the run's cancellation token all change together.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{Logic, LogicId, LogicItem};
use crate::error::{EngineError, Result};

/// Nested invocations deeper than this fail the run (cyclic definitions).
pub const MAX_NESTING_DEPTH: usize = 64;

/// A Logic being stepped, with its items already sorted by `order`.
#[derive(Debug, Clone)]
pub struct ActiveLogic {
    pub logic: Arc<Logic>,
    pub items: Arc<[LogicItem]>,
    /// Total passes over `items`: the Logic's own `repeat_count` times the
    /// invoking item's `repeat_count`.
    pub repeat_limit: u32,
}

impl ActiveLogic {
    pub fn new(logic: Arc<Logic>, invocations: u32) -> Self {
        let items: Arc<[LogicItem]> = logic.ordered_items().into();
        let repeat_limit = logic.repeat_count.max(1).saturating_mul(invocations.max(1));
        Self {
            logic,
            items,
            repeat_limit,
        }
    }

    pub fn id(&self) -> &str {
        &self.logic.id
    }
}

/// Saved position of a parent Logic while a nested one runs.
#[derive(Debug, Clone)]
pub struct Frame {
    pub logic: ActiveLogic,
    /// Index of the nested-logic item; the parent resumes at `step + 1`.
    pub step: usize,
    pub repeat: u32,
}

/// Observer-facing copy of the engine state.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExecutionState {
    pub is_executing: bool,
    pub is_stopping: bool,
    /// Index into the active Logic's sorted items.
    pub current_step: usize,
    /// 1-based pass over the active Logic's items.
    pub current_repeat: u32,
    pub logic_id: Option<LogicId>,
    /// Call-stack depth; 0 while the triggered Logic itself runs.
    pub depth: usize,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            is_executing: false,
            is_stopping: false,
            current_step: 0,
            current_repeat: 1,
            logic_id: None,
            depth: 0,
        }
    }
}

impl ExecutionState {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// One item ready to run.
#[derive(Debug, Clone)]
pub struct StepDispatch {
    pub run_id: u64,
    pub item: LogicItem,
    pub logic_id: LogicId,
    pub logic_name: String,
    pub step: usize,
    pub item_count: usize,
    pub repeat: u32,
    pub repeat_limit: u32,
    pub depth: usize,
    pub cancel: CancellationToken,
}

impl StepDispatch {
    pub fn describe(&self) -> String {
        format!(
            "[{}] step {}/{} (repeat {}/{}): {}",
            self.logic_name,
            self.step + 1,
            self.item_count,
            self.repeat,
            self.repeat_limit,
            self.item.describe()
        )
    }
}

#[derive(Debug)]
pub enum Advance {
    Dispatch(StepDispatch),
    /// The triggered Logic finished all its repeats.
    Exhausted,
    /// Run id is stale or the run is stopping.
    Inactive,
}

#[derive(Debug, Default)]
pub struct RunState {
    state: ExecutionState,
    current: Option<ActiveLogic>,
    root: Option<Arc<Logic>>,
    stack: Vec<Frame>,
    run_id: u64,
    cancel: CancellationToken,
    synthetic_input: bool,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ExecutionState {
        self.state.clone()
    }

    pub fn root(&self) -> Option<&Arc<Logic>> {
        self.root.as_ref()
    }

    pub fn is_executing(&self) -> bool {
        self.state.is_executing
    }

    /// Id of the run currently allowed to make progress.
    pub fn active_run(&self) -> Option<u64> {
        (self.state.is_executing && !self.state.is_stopping).then_some(self.run_id)
    }

    pub fn is_current(&self, run_id: u64) -> bool {
        self.active_run() == Some(run_id)
    }

    pub fn call_depth(&self) -> usize {
        self.stack.len()
    }

    /// Claim the execution slot. `None` while another run holds it.
    pub fn begin(&mut self, logic: Arc<Logic>) -> Option<u64> {
        if self.state.is_executing {
            return None;
        }
        self.run_id += 1;
        self.cancel = CancellationToken::new();
        self.stack.clear();
        self.state = ExecutionState {
            is_executing: true,
            logic_id: Some(logic.id.clone()),
            ..ExecutionState::default()
        };
        self.current = Some(ActiveLogic::new(Arc::clone(&logic), 1));
        self.root = Some(logic);
        Some(self.run_id)
    }

    /// Find the next item to dispatch, applying repeats and unwinding
    /// finished nested Logics on the way.
    pub fn next(&mut self, run_id: u64) -> Advance {
        if !self.is_current(run_id) {
            return Advance::Inactive;
        }
        loop {
            let Some(active) = self.current.as_ref() else {
                return Advance::Inactive;
            };

            if self.state.current_step < active.items.len() {
                let step = self.state.current_step;
                return Advance::Dispatch(StepDispatch {
                    run_id,
                    item: active.items[step].clone(),
                    logic_id: active.logic.id.clone(),
                    logic_name: active.logic.name.clone(),
                    step,
                    item_count: active.items.len(),
                    repeat: self.state.current_repeat,
                    repeat_limit: active.repeat_limit,
                    depth: self.stack.len(),
                    cancel: self.cancel.clone(),
                });
            }

            if self.state.current_repeat < active.repeat_limit {
                if active.items.is_empty() {
                    self.state.current_repeat = active.repeat_limit;
                } else {
                    self.state.current_step = 0;
                    self.state.current_repeat += 1;
                }
                continue;
            }

            match self.stack.pop() {
                Some(frame) => {
                    self.state.logic_id = Some(frame.logic.logic.id.clone());
                    self.state.current_step = frame.step + 1;
                    self.state.current_repeat = frame.repeat;
                    self.state.depth = self.stack.len();
                    self.current = Some(frame.logic);
                }
                None => return Advance::Exhausted,
            }
        }
    }

    /// Mark the dispatched item done. False when the run went stale meanwhile.
    pub fn complete_step(&mut self, run_id: u64) -> bool {
        if !self.is_current(run_id) {
            return false;
        }
        self.state.current_step += 1;
        true
    }

    /// Push the current position and start `child`. Ok(false) when the run
    /// went stale meanwhile.
    pub fn enter_nested(&mut self, run_id: u64, child: Arc<Logic>, invocations: u32) -> Result<bool> {
        if !self.is_current(run_id) {
            return Ok(false);
        }
        if self.stack.len() >= MAX_NESTING_DEPTH {
            return Err(EngineError::NestingTooDeep {
                logic_id: child.id.clone(),
                max: MAX_NESTING_DEPTH,
            });
        }
        let Some(parent) = self.current.take() else {
            return Ok(false);
        };
        self.stack.push(Frame {
            logic: parent,
            step: self.state.current_step,
            repeat: self.state.current_repeat,
        });
        self.state.logic_id = Some(child.id.clone());
        self.state.current_step = 0;
        self.state.current_repeat = 1;
        self.state.depth = self.stack.len();
        self.current = Some(ActiveLogic::new(child, invocations));
        Ok(true)
    }

    /// Enter the stopping phase: later ticks become no-ops and waits wake up.
    pub fn mark_stopping(&mut self) {
        if self.state.is_executing {
            self.state.is_stopping = true;
        }
        self.cancel.cancel();
    }

    /// Back to idle.
    pub fn reset(&mut self) {
        self.state = ExecutionState::default();
        self.current = None;
        self.root = None;
        self.stack.clear();
        self.synthetic_input = false;
    }

    pub fn set_synthetic(&mut self, in_flight: bool) {
        self.synthetic_input = in_flight;
    }

    pub fn synthetic_input(&self) -> bool {
        self.synthetic_input
    }
}
