use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SagaError;
use crate::step::{CompensatingAction, StepExecutor};

pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// One step of a saga: a forward operation, an optional undo operation and
/// the policy the coordinator applies when running them.
#[derive(Clone)]
pub struct StepUnit {
    name: String,
    executor: Arc<dyn StepExecutor>,
    compensation: Option<Arc<dyn CompensatingAction>>,
    timeout_secs: u64,
    retry_count: u32,
    critical: bool,
    is_async: bool,
}

impl fmt::Debug for StepUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepUnit")
            .field("name", &self.name)
            .field("has_compensation", &self.compensation.is_some())
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_count", &self.retry_count)
            .field("critical", &self.critical)
            .field("async", &self.is_async)
            .finish_non_exhaustive()
    }
}

impl StepUnit {
    pub fn builder(name: impl Into<String>, executor: Arc<dyn StepExecutor>) -> StepUnitBuilder {
        StepUnitBuilder {
            unit: Self {
                name: name.into(),
                executor,
                compensation: None,
                timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
                retry_count: DEFAULT_RETRY_COUNT,
                critical: true,
                is_async: false,
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<dyn StepExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn compensation(&self) -> Option<&Arc<dyn CompensatingAction>> {
        self.compensation.as_ref()
    }

    #[must_use]
    pub fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }

    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Bound for asynchronous execution; `None` when the timeout is zero.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Human-readable description of what compensation will do.
    #[must_use]
    pub fn compensation_description(&self) -> Option<String> {
        self.compensation.as_ref().map(|action| {
            action
                .description()
                .unwrap_or_else(|| format!("undo {}", self.name))
        })
    }
}

/// Builder for [`StepUnit`].
pub struct StepUnitBuilder {
    unit: StepUnit,
}

impl StepUnitBuilder {
    #[must_use]
    pub fn compensation(mut self, compensation: Arc<dyn CompensatingAction>) -> Self {
        self.unit.compensation = Some(compensation);
        self
    }

    #[must_use]
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.unit.timeout_secs = timeout_secs;
        self
    }

    #[must_use]
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.unit.retry_count = retry_count;
        self
    }

    #[must_use]
    pub fn critical(mut self, critical: bool) -> Self {
        self.unit.critical = critical;
        self
    }

    /// Run the forward operation on a detached task bounded by the timeout.
    #[must_use]
    pub fn run_async(mut self, is_async: bool) -> Self {
        self.unit.is_async = is_async;
        self
    }

    #[must_use]
    pub fn build(self) -> StepUnit {
        self.unit
    }
}

/// Immutable template a saga type is executed from.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    saga_type: String,
    description: String,
    steps: Vec<StepUnit>,
    compensatable: bool,
    global_timeout_secs: u64,
    retry_on_failure: bool,
}

impl SagaDefinition {
    pub fn builder(saga_type: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            definition: Self {
                saga_type: saga_type.into(),
                description: String::new(),
                steps: Vec::new(),
                compensatable: true,
                global_timeout_secs: 0,
                retry_on_failure: true,
            },
        }
    }

    #[must_use]
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn steps(&self) -> &[StepUnit] {
        &self.steps
    }

    #[must_use]
    pub fn step(&self, index: usize) -> Option<&StepUnit> {
        self.steps.get(index)
    }

    #[must_use]
    pub fn compensatable(&self) -> bool {
        self.compensatable
    }

    #[must_use]
    pub fn global_timeout_secs(&self) -> u64 {
        self.global_timeout_secs
    }

    /// Saga-level bound; `None` when unbounded.
    #[must_use]
    pub fn global_timeout(&self) -> Option<Duration> {
        (self.global_timeout_secs > 0).then(|| Duration::from_secs(self.global_timeout_secs))
    }

    /// When false, every step gets exactly one attempt.
    #[must_use]
    pub fn retry_on_failure(&self) -> bool {
        self.retry_on_failure
    }

    /// Retries the coordinator may spend on `step`.
    #[must_use]
    pub fn retry_budget(&self, step: &StepUnit) -> u32 {
        if self.retry_on_failure {
            step.retry_count()
        } else {
            0
        }
    }

    #[must_use]
    pub fn total_step_timeout_secs(&self) -> u64 {
        self.steps
            .iter()
            .fold(0u64, |total, step| total.saturating_add(step.timeout_secs))
    }

    /// Check the definition's invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidDefinition`] naming the first violated
    /// invariant.
    pub fn validate(&self) -> Result<(), SagaError> {
        if self.saga_type.trim().is_empty() {
            return Err(SagaError::invalid(
                &self.saga_type,
                "saga type must not be empty",
            ));
        }

        if self.steps.is_empty() {
            return Err(SagaError::invalid(
                &self.saga_type,
                "saga must have at least one step",
            ));
        }

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(SagaError::invalid(
                    &self.saga_type,
                    format!("step {index} has an empty name"),
                ));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(SagaError::invalid(
                    &self.saga_type,
                    format!("duplicate step name '{}'", step.name),
                ));
            }
        }

        if self.compensatable && !self.steps.iter().any(StepUnit::has_compensation) {
            return Err(SagaError::invalid(
                &self.saga_type,
                "compensatable saga has no step with a compensation",
            ));
        }

        let total = self.total_step_timeout_secs();
        if self.global_timeout_secs > 0 && total > self.global_timeout_secs {
            return Err(SagaError::invalid(
                &self.saga_type,
                format!(
                    "step timeouts total {total}s, exceeding the global timeout of {}s",
                    self.global_timeout_secs
                ),
            ));
        }

        Ok(())
    }
}

/// Builder for [`SagaDefinition`].
///
/// `build` does not validate; the registry does that on registration.
pub struct SagaDefinitionBuilder {
    definition: SagaDefinition,
}

impl SagaDefinitionBuilder {
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = description.into();
        self
    }

    #[must_use]
    pub fn step(mut self, step: StepUnit) -> Self {
        self.definition.steps.push(step);
        self
    }

    #[must_use]
    pub fn steps(mut self, steps: impl IntoIterator<Item = StepUnit>) -> Self {
        self.definition.steps.extend(steps);
        self
    }

    #[must_use]
    pub fn compensatable(mut self, compensatable: bool) -> Self {
        self.definition.compensatable = compensatable;
        self
    }

    #[must_use]
    pub fn global_timeout_secs(mut self, global_timeout_secs: u64) -> Self {
        self.definition.global_timeout_secs = global_timeout_secs;
        self
    }

    #[must_use]
    pub fn retry_on_failure(mut self, retry_on_failure: bool) -> Self {
        self.definition.retry_on_failure = retry_on_failure;
        self
    }

    #[must_use]
    pub fn build(self) -> SagaDefinition {
        self.definition
    }
}
