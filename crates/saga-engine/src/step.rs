use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::StepError;
use crate::instance::SagaId;

/// Read-only view of a saga handed to a step executor.
///
/// Combines the saga payload, the results of the steps that already ran and
/// saga metadata. Executors that run for a long time should watch
/// [`StepData::cancellation`] and stop early when it fires.
#[derive(Debug, Clone)]
pub struct StepData {
    saga_id: SagaId,
    saga_type: Arc<str>,
    step_index: usize,
    step_name: Arc<str>,
    payload: Arc<Value>,
    prior_results: Arc<BTreeMap<usize, Value>>,
    cancellation: CancellationToken,
}

impl StepData {
    pub(crate) fn new(
        saga_id: SagaId,
        saga_type: &str,
        step_index: usize,
        step_name: &str,
        payload: Value,
        prior_results: BTreeMap<usize, Value>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            saga_id,
            saga_type: Arc::from(saga_type),
            step_index,
            step_name: Arc::from(step_name),
            payload: Arc::new(payload),
            prior_results: Arc::new(prior_results),
            cancellation,
        }
    }

    pub(crate) fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
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
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Result recorded by the step at `index`, if it ran.
    #[must_use]
    pub fn prior_result(&self, index: usize) -> Option<&Value> {
        self.prior_results.get(&index)
    }

    #[must_use]
    pub fn prior_results(&self) -> &BTreeMap<usize, Value> {
        &self.prior_results
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Forward operation of a saga step.
///
/// The hooks run around every attempt and are meant for logging and
/// metrics; they cannot influence what the coordinator does next.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run the step, returning the result later steps and the compensation
    /// will see.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Retryable`] when another attempt may succeed and
    /// [`StepError::Terminal`] when it cannot.
    async fn execute(&self, data: &StepData, saga_id: SagaId) -> Result<Value, StepError>;

    fn before_execute(&self, data: &StepData) {
        let _ = data;
    }

    fn after_execute(&self, data: &StepData) {
        let _ = data;
    }

    fn on_success(&self, data: &StepData, result: &Value) {
        let _ = (data, result);
    }

    fn on_failure(&self, data: &StepData, error: &StepError) {
        let _ = (data, error);
    }
}

/// Undo operation paired with a forward step.
#[async_trait]
pub trait CompensatingAction: Send + Sync {
    /// Undo the step, given exactly the result its forward operation
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error if compensation fails.
    async fn compensate(&self, step_result: &Value, saga_id: SagaId) -> Result<(), StepError>;

    /// Human-readable description of what compensation will do.
    fn description(&self) -> Option<String> {
        None
    }

    fn before_compensate(&self, saga_id: SagaId) {
        let _ = saga_id;
    }

    fn after_compensate(&self, saga_id: SagaId) {
        let _ = saga_id;
    }

    fn on_success(&self, saga_id: SagaId) {
        let _ = saga_id;
    }

    fn on_failure(&self, saga_id: SagaId, error: &StepError) {
        let _ = (saga_id, error);
    }
}

/// Executor backed by an async closure.
pub struct FnExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StepExecutor for FnExecutor<F>
where
    F: Fn(StepData, SagaId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    async fn execute(&self, data: &StepData, saga_id: SagaId) -> Result<Value, StepError> {
        (self.f)(data.clone(), saga_id).await
    }
}

/// Compensating action backed by an async closure.
pub struct FnCompensation<F> {
    f: F,
    description: Option<String>,
}

impl<F> FnCompensation<F> {
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl<F, Fut> CompensatingAction for FnCompensation<F>
where
    F: Fn(Value, SagaId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    async fn compensate(&self, step_result: &Value, saga_id: SagaId) -> Result<(), StepError> {
        (self.f)(step_result.clone(), saga_id).await
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }
}

/// Wrap an async closure as a shareable [`StepExecutor`].
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn StepExecutor>
where
    F: Fn(StepData, SagaId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    Arc::new(FnExecutor { f })
}

/// Wrap an async closure as a shareable [`CompensatingAction`].
pub fn compensation_fn<F, Fut>(f: F) -> Arc<dyn CompensatingAction>
where
    F: Fn(Value, SagaId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    Arc::new(FnCompensation {
        f,
        description: None,
    })
}

/// Like [`compensation_fn`], with a description for audit logs and errors.
pub fn described_compensation_fn<F, Fut>(
    description: impl Into<String>,
    f: F,
) -> Arc<dyn CompensatingAction>
where
    F: Fn(Value, SagaId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    Arc::new(FnCompensation {
        f,
        description: None,
    }
    .with_description(description))
}
