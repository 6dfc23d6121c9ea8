//! Observer notifications.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::config::LogicId;

use super::state::ExecutionState;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Copy, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ForceStop,
    GuardViolation,
}

/// Pushed to every subscriber; serializes as `{"event": "...", ...}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged(ExecutionState),
    ExecutionStarted {
        logic_id: LogicId,
        logic_name: String,
    },
    ExecutionFinished {
        logic_id: LogicId,
        logic_name: String,
    },
    ExecutionFailed {
        logic_id: Option<LogicId>,
        error: String,
    },
    ExecutionStopped {
        logic_id: Option<LogicId>,
        reason: StopReason,
    },
    StepLog {
        message: String,
    },
    MonitoringChanged {
        enabled: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            trace!(target: "logic_engine::engine", "Event dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(EngineEvent::ExecutionStopped {
            logic_id: Some("l1".into()),
            reason: StopReason::GuardViolation,
        })
        .unwrap();
        assert_eq!(json["event"], "execution_stopped");
        assert_eq!(json["reason"], "guard_violation");

        let json = serde_json::to_value(EngineEvent::StateChanged(ExecutionState::default())).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["current_repeat"], 1);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(EngineEvent::MonitoringChanged { enabled: true });

        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::StepLog {
            message: "hello".into(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::StepLog {
                message: "hello".into()
            }
        );
    }
}
