#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use saga_engine::{
    CompensatingAction, Coordinator, CoordinatorConfig, DefinitionRegistry, SagaDefinition,
    SagaId, StepData, StepError, StepExecutor, StepUnit, StepUnitBuilder,
};
use serde_json::{Value, json};

/// Shared, ordered record of what the steps of a test saga did.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().expect("journal lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("journal lock").clone()
    }

    pub fn compensations(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.starts_with("compensate "))
            .collect()
    }
}

/// Succeeds with `{"step": name, "payload": payload}`.
pub struct Recording {
    pub name: &'static str,
    pub journal: Journal,
}

#[async_trait]
impl StepExecutor for Recording {
    async fn execute(&self, data: &StepData, _saga_id: SagaId) -> Result<Value, StepError> {
        self.journal.push(format!("execute {}", self.name));
        Ok(json!({"step": self.name, "payload": data.payload().clone()}))
    }
}

/// Fails every attempt.
pub struct Failing {
    pub name: &'static str,
    pub retryable: bool,
    pub journal: Journal,
}

#[async_trait]
impl StepExecutor for Failing {
    async fn execute(&self, _data: &StepData, _saga_id: SagaId) -> Result<Value, StepError> {
        self.journal.push(format!("execute {}", self.name));
        let message = format!("{} exploded", self.name);
        if self.retryable {
            Err(StepError::retryable(message))
        } else {
            Err(StepError::terminal(message))
        }
    }
}

/// Fails with a retryable error `failures` times, then succeeds.
pub struct Flaky {
    pub failures: u32,
    pub calls: Arc<AtomicU32>,
}

#[async_trait]
impl StepExecutor for Flaky {
    async fn execute(&self, _data: &StepData, _saga_id: SagaId) -> Result<Value, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(StepError::retryable(format!("transient failure {call}")))
        } else {
            Ok(json!({"succeeded_on": call}))
        }
    }
}

/// Panics on every attempt.
pub struct Panicking;

#[async_trait]
impl StepExecutor for Panicking {
    async fn execute(&self, _data: &StepData, _saga_id: SagaId) -> Result<Value, StepError> {
        let results: Vec<Value> = Vec::new();
        Ok(results[3].clone())
    }
}

/// Sleeps for `duration`, or until the step is cancelled.
pub struct Sleeping {
    pub duration: Duration,
}

#[async_trait]
impl StepExecutor for Sleeping {
    async fn execute(&self, data: &StepData, _saga_id: SagaId) -> Result<Value, StepError> {
        tokio::select! {
            () = data.cancellation().cancelled() => Err(StepError::terminal("interrupted")),
            () = tokio::time::sleep(self.duration) => Ok(json!("slept")),
        }
    }
}

/// Records the compensation and checks it received its own step's result.
pub struct Undo {
    pub name: &'static str,
    pub journal: Journal,
}

#[async_trait]
impl CompensatingAction for Undo {
    async fn compensate(&self, step_result: &Value, _saga_id: SagaId) -> Result<(), StepError> {
        if step_result["step"] != json!(self.name) {
            return Err(StepError::terminal(format!(
                "{} compensation got result {step_result}",
                self.name
            )));
        }
        self.journal.push(format!("compensate {}", self.name));
        Ok(())
    }

    fn description(&self) -> Option<String> {
        Some(format!("undo {}", self.name))
    }
}

/// Compensation that always fails terminally.
pub struct FailingUndo {
    pub name: &'static str,
    pub journal: Journal,
}

#[async_trait]
impl CompensatingAction for FailingUndo {
    async fn compensate(&self, _step_result: &Value, _saga_id: SagaId) -> Result<(), StepError> {
        self.journal.push(format!("compensate {}", self.name));
        Err(StepError::terminal(format!("{} could not be undone", self.name)))
    }
}

/// Step that records itself and has a recording compensation.
pub fn compensated(name: &'static str, journal: &Journal) -> StepUnit {
    compensated_builder(name, journal).build()
}

pub fn compensated_builder(name: &'static str, journal: &Journal) -> StepUnitBuilder {
    StepUnit::builder(
        name,
        Arc::new(Recording {
            name,
            journal: journal.clone(),
        }),
    )
    .compensation(Arc::new(Undo {
        name,
        journal: journal.clone(),
    }))
}

/// Step that records itself and has nothing to undo.
pub fn uncompensated(name: &'static str, journal: &Journal) -> StepUnit {
    StepUnit::builder(
        name,
        Arc::new(Recording {
            name,
            journal: journal.clone(),
        }),
    )
    .build()
}

/// Step that fails terminally on its only attempt.
pub fn failing(name: &'static str, journal: &Journal) -> StepUnit {
    StepUnit::builder(
        name,
        Arc::new(Failing {
            name,
            retryable: false,
            journal: journal.clone(),
        }),
    )
    .build()
}

pub fn coordinator(definitions: impl IntoIterator<Item = SagaDefinition>) -> Coordinator {
    Coordinator::builder(registry(definitions))
        .config(fast_backoff())
        .build()
}

pub fn registry(definitions: impl IntoIterator<Item = SagaDefinition>) -> DefinitionRegistry {
    let mut registry = DefinitionRegistry::new();
    for definition in definitions {
        registry.register(definition).expect("valid definition");
    }
    registry
}

pub fn fast_backoff() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_backoff_base(Duration::from_millis(10))
        .with_max_backoff(Duration::from_millis(100))
}
