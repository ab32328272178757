use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::audit::SagaAuditLog;
use crate::error::{CompensationError, SagaError};

/// Unique identifier of a saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Generate a new time-ordered identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SagaId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl SagaStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Compensated)
    }

    /// Whether `retry` may restart an instance in this status.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::Compensated)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Failed | Self::Compensated, Self::Running)
                | (
                    Self::Running,
                    Self::Completed | Self::Compensating | Self::Failed
                )
                | (Self::Compensating, Self::Compensated | Self::Failed)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Compensating => "COMPENSATING",
            Self::Compensated => "COMPENSATED",
        }
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime record of one saga execution.
///
/// Instances are owned by the coordinator; callers only ever see snapshots.
/// Every field is serializable so an observer can persist the snapshot it
/// receives on each transition and rehydrate it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    saga_id: SagaId,
    saga_type: String,
    payload: Value,
    status: SagaStatus,
    current_step_index: usize,
    step_results: BTreeMap<usize, Value>,
    error: Option<String>,
    skipped_compensations: Vec<String>,
    attempt: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    audit: SagaAuditLog,
}

impl SagaInstance {
    pub(crate) fn new(saga_type: &str, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            saga_id: SagaId::new(),
            saga_type: saga_type.to_string(),
            payload,
            status: SagaStatus::Pending,
            current_step_index: 0,
            step_results: BTreeMap::new(),
            error: None,
            skipped_compensations: Vec::new(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            audit: SagaAuditLog::new(),
        }
    }

    #[must_use]
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    #[must_use]
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    #[must_use]
    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    /// Forward results keyed by step index.
    #[must_use]
    pub fn step_results(&self) -> &BTreeMap<usize, Value> {
        &self.step_results
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Completed steps the last rollback walk could not undo.
    ///
    /// A COMPENSATED instance with a non-empty list was only partially
    /// rolled back.
    #[must_use]
    pub fn skipped_compensations(&self) -> &[String] {
        &self.skipped_compensations
    }

    #[must_use]
    pub fn is_partially_compensated(&self) -> bool {
        self.status == SagaStatus::Compensated && !self.skipped_compensations.is_empty()
    }

    /// Number of runs started for this instance (1 after `start`).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn audit(&self) -> &SagaAuditLog {
        &self.audit
    }

    pub(crate) fn audit_mut(&mut self) -> &mut SagaAuditLog {
        self.updated_at = Utc::now();
        &mut self.audit
    }

    fn transition(&mut self, next: SagaStatus) -> Result<(), SagaError> {
        if !self.status.can_transition_to(next) {
            return Err(SagaError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        self.completed_at = next.is_terminal().then_some(now);
        Ok(())
    }

    pub(crate) fn begin_run(&mut self) -> Result<(), SagaError> {
        self.transition(SagaStatus::Running)?;
        self.attempt += 1;
        Ok(())
    }

    /// Records the forward result of the current step and advances.
    ///
    /// Returns `true` when no steps remain out of `step_count`.
    pub(crate) fn record_step_result(&mut self, result: Value, step_count: usize) -> bool {
        self.step_results.insert(self.current_step_index, result);
        self.advance(step_count)
    }

    /// Moves past the current step without a result.
    pub(crate) fn skip_step(&mut self, step_count: usize) -> bool {
        self.advance(step_count)
    }

    fn advance(&mut self, step_count: usize) -> bool {
        self.current_step_index += 1;
        self.updated_at = Utc::now();
        self.current_step_index >= step_count
    }

    pub(crate) fn complete(&mut self) -> Result<(), SagaError> {
        self.transition(SagaStatus::Completed)
    }

    pub(crate) fn fail(&mut self, error: String) -> Result<(), SagaError> {
        self.transition(SagaStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    pub(crate) fn begin_compensation(&mut self, error: String) -> Result<(), SagaError> {
        self.transition(SagaStatus::Compensating)?;
        self.error = Some(error);
        Ok(())
    }

    pub(crate) fn record_skipped_compensation(&mut self, index: usize, step: &str) {
        self.skipped_compensations.push(step.to_string());
        self.audit_mut().record_compensation_skipped(index);
    }

    /// Ends the rollback walk.
    ///
    /// Any compensation failure promotes the instance to FAILED, with the
    /// original failure and every compensation failure in `error`.
    pub(crate) fn finish_compensation(
        &mut self,
        failures: &[CompensationError],
    ) -> Result<(), SagaError> {
        if failures.is_empty() {
            return self.transition(SagaStatus::Compensated);
        }

        self.transition(SagaStatus::Failed)?;
        let mut message = self.error.take().unwrap_or_default();
        for failure in failures {
            if !message.is_empty() {
                message.push_str("; ");
            }
            message.push_str(&failure.to_string());
        }
        self.error = Some(message);
        Ok(())
    }

    /// Clears the previous run so the instance can start again from step 0.
    pub(crate) fn reset_for_retry(&mut self) -> Result<(), SagaError> {
        if !self.status.is_retryable() {
            return Err(SagaError::InvalidTransition {
                from: self.status,
                to: SagaStatus::Running,
            });
        }
        self.current_step_index = 0;
        self.step_results.clear();
        self.error = None;
        self.skipped_compensations.clear();
        self.audit.clear();
        self.begin_run()
    }
}
