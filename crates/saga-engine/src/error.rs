use std::time::Duration;

use thiserror::Error;

use crate::instance::{SagaId, SagaStatus};

/// Error reported by a step executor or compensating action.
///
/// The variant decides whether the coordinator may spend the step's retry
/// budget on another attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The attempt failed, but a later attempt may succeed.
    #[error("{0}")]
    Retryable(String),
    /// The attempt failed and retrying cannot help.
    #[error("{0}")]
    Terminal(String),
}

impl StepError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Why a forward step stopped making progress.
///
/// A failure is recorded on the saga instance and drives it into the
/// compensation walk; it is never returned to the caller of `start`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StepFailure {
    /// The executor kept failing until the retry budget ran out.
    #[error("step '{step}' failed after {attempts} attempt(s): {cause}")]
    ExecutionFailed {
        /// Name of the step that failed.
        step: String,
        /// The last error returned by the executor.
        cause: StepError,
        /// Total attempts made, including the first.
        attempts: u32,
    },

    /// An asynchronous step did not finish within its time bound.
    #[error("step '{step}' timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Name of the step that timed out.
        step: String,
        /// The bound that was exceeded.
        timeout: Duration,
        /// Attempts made, including the one that timed out.
        attempts: u32,
    },

    /// The saga was cancelled while the step was in progress.
    #[error("step '{step}' cancelled")]
    Cancelled {
        /// Name of the step that was abandoned.
        step: String,
    },

    /// The saga ran past its global timeout before the step could start.
    #[error("saga exceeded its global timeout of {}s before step '{step}'", timeout.as_secs())]
    GlobalTimeout {
        /// Name of the step that was never started.
        step: String,
        /// The saga-level bound.
        timeout: Duration,
    },
}

impl StepFailure {
    /// Name of the step this failure belongs to.
    #[must_use]
    pub fn step(&self) -> &str {
        match self {
            Self::ExecutionFailed { step, .. }
            | Self::Timeout { step, .. }
            | Self::Cancelled { step }
            | Self::GlobalTimeout { step, .. } => step,
        }
    }

    /// Attempts that ran to an outcome before the failure.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::ExecutionFailed { attempts, .. } | Self::Timeout { attempts, .. } => *attempts,
            Self::Cancelled { .. } | Self::GlobalTimeout { .. } => 0,
        }
    }
}

/// Error from a failed compensation during the rollback walk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("compensation failed for step '{step}' ({description}): {error}")]
pub struct CompensationError {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The last error returned by the compensating action.
    pub error: StepError,
    /// Total attempts made, including the first.
    pub attempts: u32,
}

/// Errors returned directly to callers of the registry and coordinator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SagaError {
    #[error("invalid saga definition '{saga_type}': {reason}")]
    InvalidDefinition { saga_type: String, reason: String },

    #[error("saga type '{0}' is already registered")]
    DuplicateType(String),

    #[error("unknown saga type '{0}'")]
    UnknownSagaType(String),

    #[error("unknown step executor '{0}'")]
    UnknownExecutor(String),

    #[error("unknown compensation '{0}'")]
    UnknownCompensation(String),

    #[error("saga '{0}' not found")]
    SagaNotFound(SagaId),

    #[error("invalid saga status transition from {from} to {to}")]
    InvalidTransition { from: SagaStatus, to: SagaStatus },
}

impl SagaError {
    pub(crate) fn invalid(saga_type: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            saga_type: saga_type.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_constructors_pick_variant() {
        assert!(StepError::retryable("flaky").is_retryable());
        assert!(!StepError::terminal("broken").is_retryable());
        assert_eq!(StepError::terminal("broken").to_string(), "broken");
    }

    #[test]
    fn execution_failure_message_includes_cause_and_attempts() {
        let failure = StepFailure::ExecutionFailed {
            step: "charge_card".to_string(),
            cause: StepError::retryable("card declined"),
            attempts: 3,
        };

        assert_eq!(
            failure.to_string(),
            "step 'charge_card' failed after 3 attempt(s): card declined"
        );
        assert_eq!(failure.step(), "charge_card");
        assert_eq!(failure.attempts(), 3);
    }

    #[test]
    fn timeout_failure_is_distinguishable() {
        let failure = StepFailure::Timeout {
            step: "sync_crm".to_string(),
            timeout: Duration::from_secs(1),
            attempts: 1,
        };

        assert!(matches!(failure, StepFailure::Timeout { .. }));
        assert_eq!(failure.to_string(), "step 'sync_crm' timed out after 1s");
    }

    #[test]
    fn cancelled_failure_reports_no_attempts() {
        let failure = StepFailure::Cancelled {
            step: "provision".to_string(),
        };

        assert_eq!(failure.attempts(), 0);
        assert!(failure.to_string().contains("cancelled"));
    }

    #[test]
    fn compensation_error_names_step_and_description() {
        let err = CompensationError {
            step: "reserve_seat".to_string(),
            description: "release seat".to_string(),
            error: StepError::terminal("db down"),
            attempts: 1,
        };

        assert_eq!(
            err.to_string(),
            "compensation failed for step 'reserve_seat' (release seat): db down"
        );
    }

    #[test]
    fn invalid_definition_message_includes_reason() {
        let err = SagaError::invalid("onboarding", "saga must have at least one step");

        assert_eq!(
            err.to_string(),
            "invalid saga definition 'onboarding': saga must have at least one step"
        );
    }

    #[test]
    fn invalid_transition_message_uses_status_names() {
        let err = SagaError::InvalidTransition {
            from: SagaStatus::Completed,
            to: SagaStatus::Running,
        };

        assert_eq!(
            err.to_string(),
            "invalid saga status transition from COMPLETED to RUNNING"
        );
    }
}
