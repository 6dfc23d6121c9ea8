//! The Logic execution engine.
//!
//! Three tasks cooperate around one shared state:
//! - the key pump turns hook events into triggers and force stops;
//! - the scheduler runs exactly one item per tick, then schedules the next;
//! - the guard poll aborts the run when the target loses the foreground.
//!
//! Locks, always taken in this order when nested: `cleanup`, then `run` or
//! `monitor`. None of them is held across an `.await`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, trace, warn};

use crate::config::{EngineSettings, KeyAction, KeyBinding, LogicItem};
use crate::error::{EngineError, Result};
use crate::guard::ProcessGuard;
use crate::input::hook::{HookHandle, HookSource, SystemHook};
use crate::input::keys::{KeyEvent, KeyStroke, KeyTransition};
use crate::input::state::{KeyStateProbe, SystemKeyState};
use crate::store::LogicStore;

use super::actions::{ActionExecutor, EnigoBackend, InputBackend, WaitOutcome};
use super::events::{EngineEvent, EventBus, StopReason};
use super::state::{Advance, ExecutionState, RunState, StepDispatch};

/// Stale ticks discarded per scheduler turn before yielding.
pub const DRAIN_BATCH: usize = 32;

/// Collaborators the engine talks to.
pub struct EngineDeps {
    pub store: Arc<dyn LogicStore>,
    pub guard: Arc<ProcessGuard>,
    pub backend: Arc<dyn InputBackend>,
    pub keys: Arc<dyn KeyStateProbe>,
    pub hook: Arc<dyn HookSource>,
}

impl EngineDeps {
    /// Real OS hook, key state and input synthesis.
    pub fn system(store: Arc<dyn LogicStore>, guard: Arc<ProcessGuard>) -> Self {
        Self {
            store,
            guard,
            backend: Arc::new(EnigoBackend),
            keys: Arc::new(SystemKeyState),
            hook: Arc::new(SystemHook),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tick {
    run_id: u64,
}

enum RunEnd {
    Completed,
    Failed(EngineError),
    Stopped(StopReason),
}

enum StepOutcome {
    Continue,
    Entered,
    Cancelled,
}

struct Monitor {
    _hook: HookHandle,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct MonitorSlot {
    enabled: bool,
    active: Option<Monitor>,
}

impl MonitorSlot {
    fn is_live(&self) -> bool {
        self.active.as_ref().is_some_and(|m| !m.pump.is_finished())
    }
}

struct Shared {
    store: Arc<dyn LogicStore>,
    guard: Arc<ProcessGuard>,
    hook: Arc<dyn HookSource>,
    actions: ActionExecutor,
    run: Mutex<RunState>,
    monitor: Mutex<MonitorSlot>,
    cleanup: Mutex<()>,
    force_stop_key: RwLock<Option<KeyBinding>>,
    events: EventBus,
    ticks: mpsc::UnboundedSender<Tick>,
}

/// Handle to a running engine. Cheap to clone; background tasks stop once
/// every handle is dropped.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    /// Build the engine and spawn its scheduler and guard tasks. Must be
    /// called inside a Tokio runtime. Monitoring starts off.
    pub fn new(settings: EngineSettings, deps: EngineDeps) -> Self {
        let (ticks, tick_rx) = mpsc::unbounded_channel();
        let guard_poll = settings.guard_poll();
        let force_stop_key = settings.force_stop_key.clone();
        let shared = Arc::new(Shared {
            store: deps.store,
            guard: deps.guard,
            hook: deps.hook,
            actions: ActionExecutor::new(settings, deps.backend, deps.keys),
            run: Mutex::new(RunState::new()),
            monitor: Mutex::new(MonitorSlot::default()),
            cleanup: Mutex::new(()),
            force_stop_key: RwLock::new(force_stop_key),
            events: EventBus::new(),
            ticks,
        });

        tokio::spawn(scheduler(Arc::downgrade(&shared), tick_rx));
        tokio::spawn(guard_poll_loop(Arc::downgrade(&shared), guard_poll));
        info!(
            target: "logic_engine::engine",
            dry_run = shared.actions.is_dry_run(),
            guard_poll_ms = guard_poll.as_millis() as u64,
            "Engine created"
        );
        Self { shared }
    }

    /// Install the keyboard hook and start reacting to triggers. Idempotent.
    /// On failure monitoring stays off until called again.
    pub fn start_monitoring(&self) -> Result<()> {
        let mut slot = lock(&self.shared.monitor);
        slot.enabled = true;
        if slot.is_live() {
            return Ok(());
        }
        slot.active = None;
        match Shared::install_monitor(&self.shared) {
            Ok(monitor) => {
                slot.active = Some(monitor);
                info!(target: "logic_engine::engine", "Monitoring started");
                self.shared
                    .events
                    .emit(EngineEvent::MonitoringChanged { enabled: true });
                Ok(())
            }
            Err(err) => {
                slot.enabled = false;
                error!(target: "logic_engine::engine", error = %err, "Failed to start monitoring");
                Err(err)
            }
        }
    }

    /// Uninstall the hook. A run in flight keeps going.
    pub fn stop_monitoring(&self) {
        let mut slot = lock(&self.shared.monitor);
        slot.enabled = false;
        if let Some(monitor) = slot.active.take() {
            monitor.pump.abort();
            drop(monitor);
            info!(target: "logic_engine::engine", "Monitoring stopped");
            self.shared
                .events
                .emit(EngineEvent::MonitoringChanged { enabled: false });
        }
    }

    pub fn is_monitoring(&self) -> bool {
        let slot = lock(&self.shared.monitor);
        slot.enabled && slot.is_live()
    }

    /// Abort the current run (if any), releasing every held key. Also usable
    /// while idle to clear keys left stuck by something else.
    pub fn force_stop(&self) {
        self.shared.end_run(None, RunEnd::Stopped(StopReason::ForceStop));
    }

    /// Replace the force-stop key. A key that would also launch a Logic is
    /// rejected and the previous key stays in place.
    pub fn set_force_stop_key(&self, binding: Option<KeyBinding>) -> Result<()> {
        if let Some(binding) = &binding {
            if let Some(logic) = self.shared.store.find_shadowed_by(binding) {
                warn!(
                    target: "logic_engine::engine",
                    key = %binding.key,
                    logic = %logic.name,
                    "Force-stop key rejected: shadows a logic trigger"
                );
                return Err(EngineError::ForceStopKeyConflict {
                    key: binding.key.clone(),
                    logic: logic.name.clone(),
                });
            }
        }
        info!(target: "logic_engine::engine", key = ?binding.as_ref().map(|b| &b.key), "Force-stop key set");
        if let Ok(mut slot) = self.shared.force_stop_key.write() {
            *slot = binding;
        }
        Ok(())
    }

    /// Stop the run in flight, if any, and uninstall the hook. Unlike
    /// `force_stop`, an idle engine leaves the keyboard alone.
    pub fn shutdown(&self) {
        if self.is_running() {
            self.force_stop();
        }
        self.stop_monitoring();
        info!(target: "logic_engine::engine", "Engine shut down");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.run).is_executing()
    }

    pub fn snapshot(&self) -> ExecutionState {
        lock(&self.shared.run).snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Feed a key event as if the hook reported it.
    pub fn handle_key_event(&self, event: &KeyEvent) {
        self.shared.on_key_event(event);
    }

    pub fn guard(&self) -> &Arc<ProcessGuard> {
        &self.shared.guard
    }
}

impl Shared {
    fn install_monitor(this: &Arc<Self>) -> Result<Monitor> {
        let (tx, rx) = mpsc::unbounded_channel();
        let hook = this.hook.install(tx)?;
        let pump = tokio::spawn(key_pump(Arc::downgrade(this), rx));
        Ok(Monitor { _hook: hook, pump })
    }

    /// Reinstall the hook if monitoring is enabled but the pump has died.
    fn rearm_monitoring(this: &Arc<Self>) {
        let mut slot = lock(&this.monitor);
        if !slot.enabled || slot.is_live() {
            return;
        }
        slot.active = None;
        match Self::install_monitor(this) {
            Ok(monitor) => {
                slot.active = Some(monitor);
                info!(target: "logic_engine::engine", "Monitoring re-armed");
            }
            Err(err) => {
                slot.enabled = false;
                error!(target: "logic_engine::engine", error = %err, "Failed to re-arm monitoring");
                this.events
                    .emit(EngineEvent::MonitoringChanged { enabled: false });
            }
        }
    }

    fn on_key_event(self: &Arc<Self>, event: &KeyEvent) {
        if event.injected {
            trace!(target: "logic_engine::engine", key = %event.key, "Ignoring injected key");
            return;
        }
        match event.transition {
            KeyTransition::Pressed => {
                let is_stop_key = self
                    .force_stop_key
                    .read()
                    .ok()
                    .and_then(|slot| slot.as_ref().map(|b| b.matches(&event.key, event.scan_code)))
                    .unwrap_or(false);
                if is_stop_key {
                    info!(target: "logic_engine::engine", key = %event.key, "Force-stop key pressed");
                    self.end_run(None, RunEnd::Stopped(StopReason::ForceStop));
                }
            }
            KeyTransition::Released => self.try_trigger(event),
        }
    }

    fn try_trigger(self: &Arc<Self>, event: &KeyEvent) {
        let Some(logic) = self.store.find_by_trigger(&event.key, event.scan_code) else {
            return;
        };
        {
            let run = lock(&self.run);
            if run.synthetic_input() {
                trace!(target: "logic_engine::engine", key = %event.key, "Ignoring key during synthetic input");
                return;
            }
            if run.is_executing() {
                debug!(
                    target: "logic_engine::engine",
                    logic = %logic.name,
                    "Trigger ignored: another logic is executing"
                );
                return;
            }
        }
        if !self.guard.is_selected_active() {
            debug!(
                target: "logic_engine::engine",
                logic = %logic.name,
                "Trigger ignored: target process not in foreground"
            );
            return;
        }

        let Some(run_id) = lock(&self.run).begin(Arc::clone(&logic)) else {
            return;
        };
        info!(
            target: "logic_engine::engine",
            run_id,
            logic = %logic.name,
            repeat_count = logic.repeat_count,
            "Logic triggered"
        );
        self.events.emit(EngineEvent::ExecutionStarted {
            logic_id: logic.id.clone(),
            logic_name: logic.name.clone(),
        });
        self.schedule(run_id);
    }

    fn schedule(&self, run_id: u64) {
        if self.ticks.send(Tick { run_id }).is_err() {
            warn!(target: "logic_engine::engine", run_id, "Scheduler is gone; tick dropped");
        }
    }

    fn is_current(&self, run_id: u64) -> bool {
        lock(&self.run).is_current(run_id)
    }

    async fn run_tick(self: &Arc<Self>, run_id: u64) {
        let advance = lock(&self.run).next(run_id);
        let step = match advance {
            Advance::Inactive => return,
            Advance::Exhausted => {
                self.end_run(Some(run_id), RunEnd::Completed);
                return;
            }
            Advance::Dispatch(step) => step,
        };

        let state = lock(&self.run).snapshot();
        self.events.emit(EngineEvent::StateChanged(state));
        let message = step.describe();
        debug!(target: "logic_engine::engine", run_id, depth = step.depth, "{message}");
        self.events.emit(EngineEvent::StepLog { message });

        match self.dispatch(&step).await {
            Ok(StepOutcome::Continue) => {
                if lock(&self.run).complete_step(run_id) {
                    self.schedule(run_id);
                }
            }
            Ok(StepOutcome::Entered) => self.schedule(run_id),
            Ok(StepOutcome::Cancelled) => {
                trace!(target: "logic_engine::engine", run_id, "Step cancelled");
            }
            Err(err) if err.is_guard_violation() => {
                self.end_run(Some(run_id), RunEnd::Stopped(StopReason::GuardViolation));
            }
            Err(err) => {
                self.end_run(Some(run_id), RunEnd::Failed(err));
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, step: &StepDispatch) -> Result<StepOutcome> {
        match &step.item {
            LogicItem::KeyInput {
                key,
                scan_code,
                virtual_key,
                action,
            } => {
                let stroke = KeyStroke::new(key.as_str(), *scan_code, *virtual_key);
                lock(&self.run).set_synthetic(true);
                let result = self.actions.key_input(&stroke, *action).await;
                lock(&self.run).set_synthetic(false);
                result?;
                if *action == KeyAction::Press && !self.is_current(step.run_id) {
                    // The run ended while this key went down; cleanup already swept
                    self.actions.release_key(&stroke);
                }
                Ok(StepOutcome::Continue)
            }
            LogicItem::MouseInput {
                button,
                x_ratio,
                y_ratio,
            } => {
                let target = self.guard.selected();
                self.actions
                    .mouse_input(target.as_ref(), *button, *x_ratio, *y_ratio)
                    .await?;
                Ok(StepOutcome::Continue)
            }
            LogicItem::Delay { duration_seconds } => {
                self.actions.delay(*duration_seconds).await?;
                Ok(StepOutcome::Continue)
            }
            LogicItem::WaitClick => match self.actions.wait_click(&step.cancel).await {
                WaitOutcome::Clicked => Ok(StepOutcome::Continue),
                WaitOutcome::Cancelled => Ok(StepOutcome::Cancelled),
            },
            LogicItem::WriteText { text } => {
                self.actions.write_text(text).await?;
                Ok(StepOutcome::Continue)
            }
            LogicItem::NestedLogic {
                logic_id,
                repeat_count,
            } => {
                let child = self
                    .store
                    .resolve(logic_id)
                    .ok_or_else(|| EngineError::LogicNotFound(logic_id.clone()))?;
                let entered = lock(&self.run).enter_nested(step.run_id, child, *repeat_count)?;
                if entered {
                    debug!(
                        target: "logic_engine::engine",
                        run_id = step.run_id,
                        %logic_id,
                        repeat_count,
                        "Entered nested logic"
                    );
                    Ok(StepOutcome::Entered)
                } else {
                    Ok(StepOutcome::Cancelled)
                }
            }
        }
    }

    /// Shared exit path for completion, failure and stops. With `run_id` set,
    /// does nothing unless that run is still the active one.
    fn end_run(self: &Arc<Self>, run_id: Option<u64>, end: RunEnd) -> bool {
        let _cleanup = lock(&self.cleanup);

        let (was_executing, logic) = {
            let mut run = lock(&self.run);
            if run_id.is_some_and(|id| !run.is_current(id)) {
                return false;
            }
            let was_executing = run.is_executing();
            let logic = run.root().cloned();
            run.mark_stopping();
            (was_executing, logic)
        };
        if was_executing {
            self.events
                .emit(EngineEvent::StateChanged(lock(&self.run).snapshot()));
        }

        if !matches!(end, RunEnd::Completed) {
            self.actions.release_held_keys();
        }

        lock(&self.run).reset();

        let logic_id = logic.as_ref().map(|l| l.id.clone());
        if was_executing {
            self.events
                .emit(EngineEvent::StateChanged(ExecutionState::default()));
            match end {
                RunEnd::Completed => {
                    info!(target: "logic_engine::engine", logic = ?logic_id, "Logic finished");
                    if let Some(logic) = &logic {
                        self.events.emit(EngineEvent::ExecutionFinished {
                            logic_id: logic.id.clone(),
                            logic_name: logic.name.clone(),
                        });
                    }
                }
                RunEnd::Failed(err) => {
                    error!(target: "logic_engine::engine", logic = ?logic_id, error = %err, "Logic failed");
                    self.events.emit(EngineEvent::ExecutionFailed {
                        logic_id,
                        error: err.to_string(),
                    });
                }
                RunEnd::Stopped(reason) => {
                    info!(target: "logic_engine::engine", logic = ?logic_id, ?reason, "Logic stopped");
                    self.events
                        .emit(EngineEvent::ExecutionStopped { logic_id, reason });
                }
            }
        }

        Self::rearm_monitoring(self);
        true
    }
}

async fn key_pump(shared: Weak<Shared>, mut rx: mpsc::UnboundedReceiver<KeyEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.on_key_event(&event);
    }
    trace!(target: "logic_engine::engine", "Key pump ended");
}

async fn scheduler(shared: Weak<Shared>, mut rx: mpsc::UnboundedReceiver<Tick>) {
    let mut pending: VecDeque<Tick> = VecDeque::new();
    loop {
        let tick = match pending.pop_front() {
            Some(tick) => tick,
            None => match rx.recv().await {
                Some(tick) => tick,
                None => break,
            },
        };
        let Some(engine) = shared.upgrade() else {
            break;
        };
        if !engine.is_current(tick.run_id) {
            let dropped = drain_stale(&engine, &mut rx, &mut pending).await + 1;
            debug!(target: "logic_engine::engine", dropped, "Discarded stale ticks");
            continue;
        }
        engine.run_tick(tick.run_id).await;
    }
    trace!(target: "logic_engine::engine", "Scheduler ended");
}

/// Throw away queued ticks of finished runs, `DRAIN_BATCH` at a time with a
/// yield in between. Ticks of the active run are kept in `pending`.
async fn drain_stale(
    engine: &Shared,
    rx: &mut mpsc::UnboundedReceiver<Tick>,
    pending: &mut VecDeque<Tick>,
) -> usize {
    let mut dropped = 0;
    loop {
        let mut batch = 0;
        while batch < DRAIN_BATCH {
            match rx.try_recv() {
                Ok(tick) if engine.is_current(tick.run_id) => pending.push_back(tick),
                Ok(_) => batch += 1,
                Err(_) => break,
            }
        }
        dropped += batch;
        if batch < DRAIN_BATCH {
            return dropped;
        }
        tokio::task::yield_now().await;
    }
}

async fn guard_poll_loop(shared: Weak<Shared>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(engine) = shared.upgrade() else {
            break;
        };
        let Some(run_id) = lock(&engine.run).active_run() else {
            continue;
        };
        if !engine.guard.is_selected_active() {
            info!(target: "logic_engine::engine", run_id, "Target process lost the foreground");
            engine.end_run(Some(run_id), RunEnd::Stopped(StopReason::GuardViolation));
        }
    }
}
