use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CoordinatorConfig;
use crate::definition::StepUnit;
use crate::error::{CompensationError, StepError, StepFailure};
use crate::instance::SagaId;
use crate::step::{CompensatingAction, StepData};

enum Attempt {
    Succeeded(Value),
    Failed(StepError),
    Aborted(StepFailure),
}

/// Run the forward operation of `step`, retrying retryable errors up to
/// `retry_budget` times with exponential backoff.
///
/// Returns the step result and the number of attempts it took. Cancellation
/// of `data`'s token is honoured before every attempt, during the attempt and
/// during backoff.
pub(crate) async fn execute_step(
    step: &StepUnit,
    data: &StepData,
    retry_budget: u32,
    config: &CoordinatorConfig,
) -> Result<(Value, u32), StepFailure> {
    let executor = step.executor();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        debug!(
            saga_id = %data.saga_id(),
            step = step.name(),
            attempt,
            "executing step"
        );

        executor.before_execute(data);
        let outcome = if step.is_async() {
            attempt_detached(step, data, attempt).await
        } else {
            attempt_inline(step, data).await
        };
        executor.after_execute(data);

        let error = match outcome {
            Attempt::Succeeded(value) => {
                executor.on_success(data, &value);
                return Ok((value, attempt));
            }
            Attempt::Aborted(failure) => return Err(failure),
            Attempt::Failed(error) => error,
        };

        executor.on_failure(data, &error);
        if !error.is_retryable() || attempt > retry_budget {
            return Err(StepFailure::ExecutionFailed {
                step: step.name().to_string(),
                cause: error,
                attempts: attempt,
            });
        }

        let delay = config.backoff_delay(attempt);
        warn!(
            saga_id = %data.saga_id(),
            step = step.name(),
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "step attempt failed, retrying"
        );
        tokio::select! {
            biased;
            () = data.cancellation().cancelled() => return Err(cancelled(step)),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Run one attempt on the driver task. A panicking executor fails the
/// attempt terminally instead of taking the driver down with it.
async fn attempt_inline(step: &StepUnit, data: &StepData) -> Attempt {
    let execution = AssertUnwindSafe(step.executor().execute(data, data.saga_id())).catch_unwind();
    tokio::select! {
        biased;
        () = data.cancellation().cancelled() => Attempt::Aborted(cancelled(step)),
        result = execution => match result {
            Ok(Ok(value)) => Attempt::Succeeded(value),
            Ok(Err(error)) => Attempt::Failed(error),
            Err(panic) => Attempt::Failed(StepError::terminal(format!(
                "step panicked: {}",
                panic_message(panic.as_ref())
            ))),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Run one attempt on its own task, bounded by the step timeout.
///
/// The worker sees a child of the saga's cancellation token, so a timeout
/// only cancels the worker while a saga cancellation reaches both.
async fn attempt_detached(step: &StepUnit, data: &StepData, attempt: u32) -> Attempt {
    let worker_token = data.cancellation().child_token();
    let worker_data = data.clone().with_cancellation(worker_token.clone());
    let executor = Arc::clone(step.executor());
    let saga_id = data.saga_id();
    let mut worker =
        tokio::spawn(async move { executor.execute(&worker_data, saga_id).await });

    let joined = tokio::select! {
        biased;
        () = data.cancellation().cancelled() => {
            worker.abort();
            return Attempt::Aborted(cancelled(step));
        }
        joined = bounded(step, &mut worker) => joined,
    };

    match joined {
        Some(Ok(Ok(value))) => Attempt::Succeeded(value),
        Some(Ok(Err(error))) => Attempt::Failed(error),
        Some(Err(join_error)) => {
            Attempt::Failed(StepError::terminal(format!("step task failed: {join_error}")))
        }
        None => {
            worker_token.cancel();
            worker.abort();
            let timeout = step.timeout().unwrap_or_default();
            warn!(
                saga_id = %saga_id,
                step = step.name(),
                timeout_secs = timeout.as_secs(),
                "asynchronous step timed out"
            );
            Attempt::Aborted(StepFailure::Timeout {
                step: step.name().to_string(),
                timeout,
                attempts: attempt,
            })
        }
    }
}

/// `None` when the step timeout elapsed first.
async fn bounded<F: std::future::Future>(step: &StepUnit, worker: F) -> Option<F::Output> {
    match step.timeout() {
        Some(limit) => tokio::time::timeout(limit, worker).await.ok(),
        None => Some(worker.await),
    }
}

fn cancelled(step: &StepUnit) -> StepFailure {
    StepFailure::Cancelled {
        step: step.name().to_string(),
    }
}

/// Run `action` against the forward result of `step` with the same retry
/// policy as forward execution.
///
/// Compensation is not cancellable: once the rollback walk starts it runs to
/// the end.
pub(crate) async fn compensate_step(
    step: &StepUnit,
    action: &Arc<dyn CompensatingAction>,
    step_result: &Value,
    saga_id: SagaId,
    retry_budget: u32,
    config: &CoordinatorConfig,
) -> Result<u32, CompensationError> {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        debug!(saga_id = %saga_id, step = step.name(), attempt, "compensating step");

        action.before_compensate(saga_id);
        let outcome = action.compensate(step_result, saga_id).await;
        action.after_compensate(saga_id);

        let error = match outcome {
            Ok(()) => {
                action.on_success(saga_id);
                return Ok(attempt);
            }
            Err(error) => error,
        };

        action.on_failure(saga_id, &error);
        if !error.is_retryable() || attempt > retry_budget {
            return Err(CompensationError {
                step: step.name().to_string(),
                description: step
                    .compensation_description()
                    .unwrap_or_else(|| format!("undo {}", step.name())),
                error,
                attempts: attempt,
            });
        }

        let delay = config.backoff_delay(attempt);
        warn!(
            saga_id = %saga_id,
            step = step.name(),
            attempt,
            error = %error,
            "compensation attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
