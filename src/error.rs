//! Engine error taxonomy.
//!
//! Run-level failures (`LogicNotFound`, `NestingTooDeep`, `ActionFailed`,
//! `NoTargetProcess`, `GuardViolation`) all end the current run through the same
//! cleanup path as a force stop. `HookInstall` is the only error that turns
//! monitoring off until it is retried explicitly. `ForceStopKeyConflict` is
//! returned by configuration calls and never ends a run.

use std::fmt::Display;
use thiserror::Error;

use crate::config::LogicId;

/// Main error type for engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The OS keyboard hook could not be installed.
    #[error("failed to install keyboard hook: {0}")]
    HookInstall(String),

    /// A nested-logic item referenced an id the store does not know.
    #[error("logic '{0}' not found")]
    LogicNotFound(LogicId),

    /// Nested invocations went deeper than the engine allows.
    #[error("maximum nesting depth ({max}) exceeded while entering logic '{logic_id}' (possible cycle)")]
    NestingTooDeep { logic_id: LogicId, max: usize },

    /// An action executor failed while touching the OS.
    #[error("{kind} action failed: {reason}")]
    ActionFailed { kind: &'static str, reason: String },

    /// The bound process is no longer the foreground process.
    #[error("target process is no longer in the foreground")]
    GuardViolation,

    /// An action needs a bound target process but none is selected.
    #[error("no target process selected")]
    NoTargetProcess,

    /// The force-stop key would also launch a Logic.
    #[error("force-stop key '{key}' collides with the trigger of logic '{logic}'")]
    ForceStopKeyConflict { key: String, logic: String },

    /// Platform-specific operation is not supported.
    #[error("operation not supported on this platform: {0}")]
    UnsupportedPlatform(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create a new HookInstall error.
    pub fn hook_install(reason: impl Display) -> Self {
        Self::HookInstall(reason.to_string())
    }

    /// Create a new ActionFailed error, keeping the full anyhow context chain.
    pub fn action_failed(kind: &'static str, err: &anyhow::Error) -> Self {
        Self::ActionFailed {
            kind,
            reason: format!("{err:#}"),
        }
    }

    /// Create a new UnsupportedPlatform error.
    pub fn unsupported_platform(message: impl Into<String>) -> Self {
        Self::UnsupportedPlatform(message.into())
    }

    /// Guard violations end a run silently instead of being reported as failures.
    pub fn is_guard_violation(&self) -> bool {
        matches!(self, Self::GuardViolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::LogicNotFound("combo".into());
        assert_eq!(err.to_string(), "logic 'combo' not found");

        let err = EngineError::NestingTooDeep {
            logic_id: "loop".into(),
            max: 64,
        };
        assert!(err.to_string().contains("maximum nesting depth (64)"));

        let err = EngineError::action_failed("key_input", &anyhow::anyhow!("SendInput rejected"));
        assert_eq!(err.to_string(), "key_input action failed: SendInput rejected");
    }

    #[test]
    fn test_action_failed_keeps_context() {
        let err = anyhow::anyhow!("access denied").context("Failed to open clipboard");
        let err = EngineError::action_failed("write_text", &err);
        assert_eq!(
            err.to_string(),
            "write_text action failed: Failed to open clipboard: access denied"
        );
    }

    #[test]
    fn test_guard_violation_flag() {
        assert!(EngineError::GuardViolation.is_guard_violation());
        assert!(!EngineError::NoTargetProcess.is_guard_violation());
    }
}
