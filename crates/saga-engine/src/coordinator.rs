use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::definition::SagaDefinition;
use crate::error::{SagaError, StepFailure};
use crate::execution::{compensate_step, execute_step};
use crate::instance::{SagaId, SagaInstance, SagaStatus};
use crate::observer::SagaObserver;
use crate::registry::DefinitionRegistry;
use crate::step::StepData;

/// Live view of one saga instance, returned by [`Coordinator::start`] and
/// [`Coordinator::retry`].
#[derive(Debug, Clone)]
pub struct SagaHandle {
    saga_id: SagaId,
    updates: watch::Receiver<SagaInstance>,
}

impl SagaHandle {
    #[must_use]
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    #[must_use]
    pub fn status(&self) -> SagaStatus {
        self.updates.borrow().status()
    }

    /// Latest published state of the instance.
    #[must_use]
    pub fn snapshot(&self) -> SagaInstance {
        self.updates.borrow().clone()
    }

    /// Wait until the instance reaches a terminal status.
    ///
    /// Returns immediately when it already has. If the coordinator stops
    /// tracking the instance first, the last published snapshot is returned.
    pub async fn finished(&mut self) -> SagaInstance {
        loop {
            {
                let current = self.updates.borrow_and_update();
                if current.status().is_terminal() {
                    return current.clone();
                }
            }
            if self.updates.changed().await.is_err() {
                return self.updates.borrow().clone();
            }
        }
    }
}

struct ActiveSaga {
    instance: SagaInstance,
    cancel: CancellationToken,
    updates: Arc<watch::Sender<SagaInstance>>,
}

struct Inner {
    registry: Arc<DefinitionRegistry>,
    config: CoordinatorConfig,
    observers: Vec<Arc<dyn SagaObserver>>,
    active: DashMap<SagaId, ActiveSaga>,
}

impl Inner {
    /// Mutate a tracked instance and publish the result.
    ///
    /// The entry lock is released before observers run. Observers are only
    /// called when the status, step index or skipped compensations changed,
    /// and always before watchers see the new snapshot.
    fn apply<T>(
        &self,
        saga_id: SagaId,
        mutate: impl FnOnce(&mut ActiveSaga) -> Result<T, SagaError>,
    ) -> Result<T, SagaError> {
        let (value, snapshot, changed, updates) = {
            let mut entry = self
                .active
                .get_mut(&saga_id)
                .ok_or(SagaError::SagaNotFound(saga_id))?;
            let before = progress(&entry.instance);
            let value = mutate(&mut entry)?;
            let snapshot = entry.instance.clone();
            let changed = progress(&snapshot) != before;
            (value, snapshot, changed, Arc::clone(&entry.updates))
        };

        if changed {
            self.notify(&snapshot);
        }
        updates.send_replace(snapshot);
        Ok(value)
    }

    fn notify(&self, instance: &SagaInstance) {
        for observer in &self.observers {
            observer.on_transition(instance);
        }
    }

    fn snapshot(&self, saga_id: SagaId) -> Result<SagaInstance, SagaError> {
        self.active
            .get(&saga_id)
            .map(|entry| entry.instance.clone())
            .ok_or(SagaError::SagaNotFound(saga_id))
    }
}

fn progress(instance: &SagaInstance) -> (SagaStatus, usize, usize) {
    (
        instance.status(),
        instance.current_step_index(),
        instance.skipped_compensations().len(),
    )
}

/// Runs saga instances against the definitions of a [`DefinitionRegistry`].
///
/// Every instance is driven by its own task. Steps of one instance run
/// strictly in order; instances are independent of each other. The
/// coordinator is cheap to clone and all clones share the same instances.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("saga_types", &self.inner.registry.saga_types())
            .field("config", &self.inner.config)
            .field("observers", &self.inner.observers.len())
            .field("active", &self.inner.active.len())
            .finish()
    }
}

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    registry: Arc<DefinitionRegistry>,
    config: CoordinatorConfig,
    observers: Vec<Arc<dyn SagaObserver>>,
}

impl CoordinatorBuilder {
    #[must_use]
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn SagaObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    #[must_use]
    pub fn build(self) -> Coordinator {
        Coordinator {
            inner: Arc::new(Inner {
                registry: self.registry,
                config: self.config,
                observers: self.observers,
                active: DashMap::new(),
            }),
        }
    }
}

impl Coordinator {
    /// Coordinator with the default configuration and no observers.
    #[must_use]
    pub fn new(registry: impl Into<Arc<DefinitionRegistry>>) -> Self {
        Self::builder(registry).build()
    }

    pub fn builder(registry: impl Into<Arc<DefinitionRegistry>>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            registry: registry.into(),
            config: CoordinatorConfig::default(),
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &DefinitionRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Create an instance of `saga_type` and start executing it.
    ///
    /// Returns once the outcome of the first step has been processed. Step
    /// failures never surface here; they are recorded on the instance.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::UnknownSagaType`] if the type is not registered.
    pub async fn start(&self, saga_type: &str, payload: Value) -> Result<SagaHandle, SagaError> {
        let definition = self.inner.registry.lookup(saga_type)?;
        let instance = SagaInstance::new(definition.saga_type(), payload);
        let saga_id = instance.saga_id();
        let cancel = CancellationToken::new();
        let (updates, receiver) = watch::channel(instance.clone());

        self.inner.active.insert(
            saga_id,
            ActiveSaga {
                instance: instance.clone(),
                cancel: cancel.clone(),
                updates: Arc::new(updates),
            },
        );
        self.inner.notify(&instance);
        self.inner
            .apply(saga_id, |active| active.instance.begin_run())?;

        info!(
            saga_id = %saga_id,
            saga_type = definition.saga_type(),
            steps = definition.steps().len(),
            "saga started"
        );
        Ok(self.launch(definition, saga_id, cancel, receiver).await)
    }

    /// Abandon the current step of a running instance and roll back.
    ///
    /// Does nothing unless the instance is RUNNING.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::SagaNotFound`] if the instance is not tracked.
    pub fn cancel(&self, saga_id: SagaId) -> Result<(), SagaError> {
        let entry = self
            .inner
            .active
            .get(&saga_id)
            .ok_or(SagaError::SagaNotFound(saga_id))?;

        if entry.instance.status() == SagaStatus::Running {
            info!(saga_id = %saga_id, "cancelling saga");
            entry.cancel.cancel();
        } else {
            debug!(
                saga_id = %saga_id,
                status = %entry.instance.status(),
                "cancel ignored for saga that is not running"
            );
        }
        Ok(())
    }

    /// Restart a FAILED or COMPENSATED instance from its first step.
    ///
    /// On any other status nothing happens and a handle to the instance is
    /// returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::SagaNotFound`] if the instance is not tracked
    /// (completed instances are dropped unless retained) and
    /// [`SagaError::UnknownSagaType`] if its definition is gone.
    pub async fn retry(&self, saga_id: SagaId) -> Result<SagaHandle, SagaError> {
        let saga_type = self.inner.snapshot(saga_id)?.saga_type().to_string();
        let definition = self.inner.registry.lookup(&saga_type)?;

        let restarted = self.inner.apply(saga_id, |active| {
            let receiver = active.updates.subscribe();
            if !active.instance.status().is_retryable() {
                return Ok((None, receiver));
            }
            active.instance.reset_for_retry()?;
            active.cancel = CancellationToken::new();
            Ok((Some(active.cancel.clone()), receiver))
        })?;

        match restarted {
            (Some(cancel), receiver) => {
                info!(saga_id = %saga_id, saga_type, "retrying saga");
                Ok(self.launch(definition, saga_id, cancel, receiver).await)
            }
            (None, receiver) => {
                debug!(
                    saga_id = %saga_id,
                    status = %receiver.borrow().status(),
                    "retry ignored for saga that has not failed"
                );
                Ok(SagaHandle { saga_id, updates: receiver })
            }
        }
    }

    /// Snapshot of a tracked instance.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::SagaNotFound`] if the instance is not tracked.
    pub fn get_instance(&self, saga_id: SagaId) -> Result<SagaInstance, SagaError> {
        self.inner.snapshot(saga_id)
    }

    /// Wait for a tracked instance to reach a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::SagaNotFound`] if the instance is not tracked.
    pub async fn wait(&self, saga_id: SagaId) -> Result<SagaInstance, SagaError> {
        let updates = self
            .inner
            .active
            .get(&saga_id)
            .map(|entry| entry.updates.subscribe())
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        Ok(SagaHandle { saga_id, updates }.finished().await)
    }

    /// Snapshots of every tracked instance, oldest first.
    #[must_use]
    pub fn instances(&self) -> Vec<SagaInstance> {
        let mut instances: Vec<SagaInstance> = self
            .inner
            .active
            .iter()
            .map(|entry| entry.instance.clone())
            .collect();
        instances.sort_by_key(SagaInstance::saga_id);
        instances
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    /// Drop every instance in a terminal status. Returns how many were
    /// dropped.
    pub fn cleanup(&self) -> usize {
        let mut evicted = 0;
        self.inner.active.retain(|_, active| {
            let terminal = active.instance.status().is_terminal();
            if terminal {
                evicted += 1;
            }
            !terminal
        });
        if evicted > 0 {
            info!(evicted, "cleaned up finished sagas");
        }
        evicted
    }

    async fn launch(
        &self,
        definition: Arc<SagaDefinition>,
        saga_id: SagaId,
        cancel: CancellationToken,
        updates: watch::Receiver<SagaInstance>,
    ) -> SagaHandle {
        let (first_step_tx, first_step_rx) = oneshot::channel();
        let driver = Driver {
            inner: Arc::clone(&self.inner),
            definition,
            saga_id,
            cancel,
            first_step: Some(first_step_tx),
        };
        tokio::spawn(driver.run());

        // A closed channel means the driver stopped early; the handle still
        // shows whatever it last published.
        let _ = first_step_rx.await;
        SagaHandle { saga_id, updates }
    }
}

/// Task that owns the progress of one saga run.
struct Driver {
    inner: Arc<Inner>,
    definition: Arc<SagaDefinition>,
    saga_id: SagaId,
    cancel: CancellationToken,
    first_step: Option<oneshot::Sender<()>>,
}

impl Driver {
    async fn run(mut self) {
        if let Err(err) = self.drive().await {
            error!(saga_id = %self.saga_id, error = %err, "saga driver stopped");
        }
        self.first_step_processed();
    }

    fn first_step_processed(&mut self) {
        if let Some(sender) = self.first_step.take() {
            let _ = sender.send(());
        }
    }

    async fn drive(&mut self) -> Result<(), SagaError> {
        let started = Instant::now();
        let definition = Arc::clone(&self.definition);
        let step_count = definition.steps().len();
        let mut index = self.inner.snapshot(self.saga_id)?.current_step_index();

        while let Some(step) = definition.step(index) {
            if let Some(limit) = definition.global_timeout() {
                if started.elapsed() > limit {
                    let failure = StepFailure::GlobalTimeout {
                        step: step.name().to_string(),
                        timeout: limit,
                    };
                    return self.on_step_failed(index, failure).await;
                }
            }

            let data = self.inner.apply(self.saga_id, |active| {
                active.instance.audit_mut().record_start(index, step.name());
                Ok(StepData::new(
                    self.saga_id,
                    definition.saga_type(),
                    index,
                    step.name(),
                    active.instance.payload().clone(),
                    active.instance.step_results().clone(),
                    self.cancel.clone(),
                ))
            })?;

            let finished = match execute_step(
                step,
                &data,
                definition.retry_budget(step),
                &self.inner.config,
            )
            .await
            {
                Ok((value, attempts)) => {
                    debug!(
                        saga_id = %self.saga_id,
                        step = step.name(),
                        attempts,
                        "step completed"
                    );
                    self.on_step_completed(index, value, attempts)?
                }
                Err(failure) if !step.is_critical() && skippable(&failure) => {
                    warn!(
                        saga_id = %self.saga_id,
                        step = step.name(),
                        error = %failure,
                        "non-critical step failed, continuing"
                    );
                    self.inner.apply(self.saga_id, |active| {
                        active
                            .instance
                            .audit_mut()
                            .record_skipped(index, failure.attempts());
                        Ok(active.instance.skip_step(step_count))
                    })?
                }
                Err(failure) => return self.on_step_failed(index, failure).await,
            };

            if finished {
                return self.complete();
            }
            self.first_step_processed();
            index += 1;
        }

        self.complete()
    }

    /// Returns `true` when the saga has no steps left.
    fn on_step_completed(
        &self,
        index: usize,
        value: Value,
        attempts: u32,
    ) -> Result<bool, SagaError> {
        let step_count = self.definition.steps().len();
        let description = self
            .definition
            .step(index)
            .and_then(|step| step.compensation_description());
        self.inner.apply(self.saga_id, |active| {
            active
                .instance
                .audit_mut()
                .record_success(index, attempts, description);
            Ok(active.instance.record_step_result(value, step_count))
        })
    }

    /// Completed instances leave the active table before watchers see them,
    /// unless the coordinator retains them.
    fn complete(&self) -> Result<(), SagaError> {
        if self.inner.config.retain_completed() {
            self.inner
                .apply(self.saga_id, |active| active.instance.complete())?;
        } else {
            let (_, mut active) = self
                .inner
                .active
                .remove(&self.saga_id)
                .ok_or(SagaError::SagaNotFound(self.saga_id))?;
            active.instance.complete()?;
            self.inner.notify(&active.instance);
            active.updates.send_replace(active.instance);
        }

        info!(
            saga_id = %self.saga_id,
            saga_type = self.definition.saga_type(),
            "saga completed"
        );
        Ok(())
    }

    /// Failure path: roll back every completed step in reverse order.
    async fn on_step_failed(&self, index: usize, failure: StepFailure) -> Result<(), SagaError> {
        warn!(
            saga_id = %self.saga_id,
            step = failure.step(),
            error = %failure,
            "saga step failed"
        );
        let message = failure.to_string();

        if !self.definition.compensatable() {
            self.inner.apply(self.saga_id, |active| {
                active
                    .instance
                    .audit_mut()
                    .record_failure(index, failure.attempts());
                active.instance.fail(message)
            })?;
            info!(saga_id = %self.saga_id, "saga failed without compensation");
            return Ok(());
        }

        let results = self.inner.apply(self.saga_id, |active| {
            active
                .instance
                .audit_mut()
                .record_failure(index, failure.attempts());
            active.instance.begin_compensation(message)?;
            Ok(active.instance.step_results().clone())
        })?;

        let mut failures = Vec::new();
        for index in (0..index).rev() {
            let Some(step) = self.definition.step(index) else {
                continue;
            };
            // Non-critical steps that were skipped have nothing to undo.
            let Some(result) = results.get(&index) else {
                continue;
            };
            let Some(action) = step.compensation() else {
                warn!(
                    saga_id = %self.saga_id,
                    step = step.name(),
                    "step has no compensation, leaving its effects in place"
                );
                self.inner.apply(self.saga_id, |active| {
                    active.instance.record_skipped_compensation(index, step.name());
                    Ok(())
                })?;
                continue;
            };

            match compensate_step(
                step,
                action,
                result,
                self.saga_id,
                self.definition.retry_budget(step),
                &self.inner.config,
            )
            .await
            {
                Ok(attempts) => {
                    debug!(
                        saga_id = %self.saga_id,
                        step = step.name(),
                        attempts,
                        "step compensated"
                    );
                    self.inner.apply(self.saga_id, |active| {
                        active.instance.audit_mut().record_compensated(index);
                        Ok(())
                    })?;
                }
                Err(err) => {
                    error!(
                        saga_id = %self.saga_id,
                        step = step.name(),
                        error = %err,
                        "compensation failed"
                    );
                    self.inner.apply(self.saga_id, |active| {
                        active.instance.audit_mut().record_compensation_failed(index);
                        Ok(())
                    })?;
                    failures.push(err);
                }
            }
        }

        let status = self.inner.apply(self.saga_id, |active| {
            active.instance.finish_compensation(&failures)?;
            Ok(active.instance.status())
        })?;
        info!(saga_id = %self.saga_id, status = %status, "saga rolled back");
        Ok(())
    }
}

/// Failures a non-critical step may be skipped past.
fn skippable(failure: &StepFailure) -> bool {
    matches!(
        failure,
        StepFailure::ExecutionFailed { .. } | StepFailure::Timeout { .. }
    )
}
