//! Integration tests for step retries and saga-level retry.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use common::{Flaky, Journal, compensated, coordinator, failing, registry, uncompensated};
use saga_engine::{
    Coordinator, CoordinatorConfig, SagaDefinition, SagaError, SagaStatus, StepUnit,
};
use serde_json::{Value, json};
use tokio::time::Instant;

fn flaky(name: &'static str, failures: u32, calls: &Arc<AtomicU32>) -> StepUnit {
    StepUnit::builder(
        name,
        Arc::new(Flaky {
            failures,
            calls: Arc::clone(calls),
        }),
    )
    .build()
}

#[tokio::test(start_paused = true)]
async fn step_succeeds_on_third_attempt() -> anyhow::Result<()> {
    let journal = Journal::default();
    let calls = Arc::new(AtomicU32::new(0));
    let definition = SagaDefinition::builder("billing")
        .step(compensated("open_account", &journal))
        .step(flaky("charge_card", 2, &calls))
        .build();
    let coordinator = Coordinator::builder(registry([definition]))
        .config(CoordinatorConfig::default())
        .build();
    let started = Instant::now();

    let mut handle = coordinator.start("billing", Value::Null).await?;
    let finished = handle.finished().await;

    assert_eq!(finished.status(), SagaStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(finished.step_results().get(&1), Some(&json!({"succeeded_on": 3})));
    assert_eq!(finished.audit().record(1).map(|r| r.attempts), Some(3));
    // 1s then 2s of backoff with the default configuration.
    assert!(started.elapsed() >= Duration::from_secs(3));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_trigger_compensation() -> anyhow::Result<()> {
    let journal = Journal::default();
    let calls = Arc::new(AtomicU32::new(0));
    let definition = SagaDefinition::builder("billing")
        .step(compensated("open_account", &journal))
        .step(flaky("charge_card", u32::MAX, &calls))
        .build();
    let coordinator = coordinator([definition]);

    let mut handle = coordinator.start("billing", Value::Null).await?;
    let finished = handle.finished().await;

    assert_eq!(finished.status(), SagaStatus::Compensated);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(journal.compensations(), ["compensate open_account"]);
    let error = finished.error().expect("error recorded");
    assert!(error.contains("after 4 attempt(s)"), "{error}");
    assert!(error.contains("transient failure 4"), "{error}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_on_failure_disabled_gives_single_attempt() -> anyhow::Result<()> {
    let journal = Journal::default();
    let calls = Arc::new(AtomicU32::new(0));
    let definition = SagaDefinition::builder("billing")
        .retry_on_failure(false)
        .step(compensated("open_account", &journal))
        .step(flaky("charge_card", 1, &calls))
        .build();
    let coordinator = coordinator([definition]);

    let mut handle = coordinator.start("billing", Value::Null).await?;
    let finished = handle.finished().await;

    assert_eq!(finished.status(), SagaStatus::Compensated);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_restarts_compensated_saga_from_first_step() -> anyhow::Result<()> {
    let journal = Journal::default();
    let calls = Arc::new(AtomicU32::new(0));
    let definition = SagaDefinition::builder("billing")
        .step(compensated("open_account", &journal))
        .step(flaky("charge_card", 4, &calls))
        .build();
    let coordinator = coordinator([definition]);

    let mut first_run = coordinator.start("billing", Value::Null).await?;
    let failed = first_run.finished().await;
    assert_eq!(failed.status(), SagaStatus::Compensated);

    let mut second_run = coordinator.retry(failed.saga_id()).await?;
    let finished = second_run.finished().await;

    assert_eq!(finished.saga_id(), failed.saga_id());
    assert_eq!(finished.status(), SagaStatus::Completed);
    assert_eq!(finished.attempt(), 2);
    assert!(finished.error().is_none());
    assert!(finished.skipped_compensations().is_empty());
    assert_eq!(finished.step_results().len(), 2);
    assert_eq!(
        journal.entries(),
        [
            "execute open_account",
            "compensate open_account",
            "execute open_account",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn retry_restarts_failed_saga_from_first_step() -> anyhow::Result<()> {
    let journal = Journal::default();
    let calls = Arc::new(AtomicU32::new(0));
    let definition = SagaDefinition::builder("billing")
        .compensatable(false)
        .retry_on_failure(false)
        .step(uncompensated("open_account", &journal))
        .step(flaky("charge_card", 1, &calls))
        .build();
    let coordinator = coordinator([definition]);

    let mut first_run = coordinator.start("billing", Value::Null).await?;
    let failed = first_run.finished().await;
    assert_eq!(failed.status(), SagaStatus::Failed);
    assert_eq!(failed.step_results().len(), 1);
    assert!(failed.error().is_some());

    let mut second_run = coordinator.retry(failed.saga_id()).await?;
    let finished = second_run.finished().await;

    assert_eq!(finished.saga_id(), failed.saga_id());
    assert_eq!(finished.status(), SagaStatus::Completed);
    assert_eq!(finished.attempt(), 2);
    assert!(finished.error().is_none());
    assert_eq!(finished.step_results().get(&1), Some(&json!({"succeeded_on": 2})));
    assert_eq!(
        journal.entries(),
        ["execute open_account", "execute open_account"]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn retry_of_compensated_saga_runs_it_again() -> anyhow::Result<()> {
    let journal = Journal::default();
    let definition = SagaDefinition::builder("doomed")
        .step(compensated("reserve", &journal))
        .step(failing("charge", &journal))
        .build();
    let coordinator = coordinator([definition]);

    let mut handle = coordinator.start("doomed", Value::Null).await?;
    let rolled_back = handle.finished().await;
    assert_eq!(rolled_back.status(), SagaStatus::Compensated);

    let mut retried = coordinator.retry(rolled_back.saga_id()).await?;
    let finished = retried.finished().await;

    assert_eq!(finished.status(), SagaStatus::Compensated);
    assert_eq!(finished.attempt(), 2);
    assert_eq!(finished.audit().records().len(), 2);
    assert_eq!(
        journal.compensations(),
        ["compensate reserve", "compensate reserve"]
    );
    Ok(())
}

#[tokio::test]
async fn retry_of_completed_saga_is_not_found_once_evicted() -> anyhow::Result<()> {
    let journal = Journal::default();
    let definition = SagaDefinition::builder("single")
        .step(compensated("only", &journal))
        .build();
    let coordinator = coordinator([definition]);

    let mut handle = coordinator.start("single", Value::Null).await?;
    let finished = handle.finished().await;
    assert_eq!(finished.status(), SagaStatus::Completed);

    assert!(matches!(
        coordinator.retry(finished.saga_id()).await,
        Err(SagaError::SagaNotFound(_))
    ));
    assert_eq!(journal.entries(), ["execute only"]);
    Ok(())
}

#[tokio::test]
async fn retry_of_retained_completed_saga_is_a_no_op() -> anyhow::Result<()> {
    let journal = Journal::default();
    let definition = SagaDefinition::builder("single")
        .step(compensated("only", &journal))
        .build();
    let coordinator = Coordinator::builder(registry([definition]))
        .config(CoordinatorConfig::default().with_retain_completed(true))
        .build();

    let mut handle = coordinator.start("single", Value::Null).await?;
    let finished = handle.finished().await;

    let retried = coordinator.retry(finished.saga_id()).await?;

    assert_eq!(retried.status(), SagaStatus::Completed);
    assert_eq!(retried.snapshot().attempt(), 1);
    assert_eq!(journal.entries(), ["execute only"]);
    Ok(())
}
