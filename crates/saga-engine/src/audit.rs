use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a step in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum StepStatus {
    /// Step is executing.
    Running,
    /// Step executed successfully.
    Executed,
    /// Step failed during execution.
    Failed,
    /// Non-critical step failed and the saga moved past it.
    Skipped,
    /// Step was compensated successfully.
    Compensated,
    /// Step compensation failed.
    CompensationFailed,
    /// Step had no compensation, so the rollback walk passed over it.
    CompensationSkipped,
}

/// Record of a step's execution in the saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Position of the step in its definition.
    pub index: usize,
    /// Name of the step.
    pub name: String,
    /// Current status.
    pub status: StepStatus,
    /// Attempts made by the forward operation.
    pub attempts: u32,
    /// When the step started executing.
    pub started_at: DateTime<Utc>,
    /// When the step completed (execution or compensation).
    pub completed_at: Option<DateTime<Utc>>,
    /// Description of compensation (if applicable).
    pub compensation_description: Option<String>,
}

/// Audit log tracking all step executions of one saga run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaAuditLog {
    records: Vec<StepRecord>,
}

impl SagaAuditLog {
    /// Create a new empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&mut self, index: usize, name: &str) {
        self.records.push(StepRecord {
            index,
            name: name.to_string(),
            status: StepStatus::Running,
            attempts: 0,
            started_at: Utc::now(),
            completed_at: None,
            compensation_description: None,
        });
    }

    pub(crate) fn record_success(
        &mut self,
        index: usize,
        attempts: u32,
        compensation_description: Option<String>,
    ) {
        if let Some(record) = self.latest_mut(index) {
            record.status = StepStatus::Executed;
            record.attempts = attempts;
            record.completed_at = Some(Utc::now());
            record.compensation_description = compensation_description;
        }
    }

    pub(crate) fn record_failure(&mut self, index: usize, attempts: u32) {
        self.finish(index, StepStatus::Failed, Some(attempts));
    }

    pub(crate) fn record_skipped(&mut self, index: usize, attempts: u32) {
        self.finish(index, StepStatus::Skipped, Some(attempts));
    }

    pub(crate) fn record_compensated(&mut self, index: usize) {
        self.finish(index, StepStatus::Compensated, None);
    }

    pub(crate) fn record_compensation_failed(&mut self, index: usize) {
        self.finish(index, StepStatus::CompensationFailed, None);
    }

    pub(crate) fn record_compensation_skipped(&mut self, index: usize) {
        self.finish(index, StepStatus::CompensationSkipped, None);
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    fn finish(&mut self, index: usize, status: StepStatus, attempts: Option<u32>) {
        if let Some(record) = self.latest_mut(index) {
            record.status = status;
            record.completed_at = Some(Utc::now());
            if let Some(attempts) = attempts {
                record.attempts = attempts;
            }
        }
    }

    fn latest_mut(&mut self, index: usize) -> Option<&mut StepRecord> {
        self.records.iter_mut().rev().find(|r| r.index == index)
    }

    /// Get all records in the audit log.
    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Latest record for the step at `index`.
    #[must_use]
    pub fn record(&self, index: usize) -> Option<&StepRecord> {
        self.records.iter().rev().find(|r| r.index == index)
    }

    /// Get a summary of the saga execution for display.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for record in &self.records {
            let status = match record.status {
                StepStatus::Running => "…",
                StepStatus::Executed => "✓",
                StepStatus::Failed => "✗",
                StepStatus::Skipped => "↷",
                StepStatus::Compensated => "↩",
                StepStatus::CompensationFailed => "⚠",
                StepStatus::CompensationSkipped => "∅",
            };
            lines.push(format!("{status} {}", record.name));
        }
        lines.join("\n")
    }
}
