use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::definition::SagaDefinition;
use crate::error::SagaError;
use crate::step::{CompensatingAction, StepExecutor};

/// Table of saga definitions keyed by saga type.
///
/// Populated once at startup and handed to the coordinator, which only ever
/// reads it.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: IndexMap<String, Arc<SagaDefinition>>,
}

impl DefinitionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a definition.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidDefinition`] if an invariant is violated
    /// and [`SagaError::DuplicateType`] if the type is already registered.
    pub fn register(&mut self, definition: SagaDefinition) -> Result<(), SagaError> {
        definition.validate()?;

        if self.definitions.contains_key(definition.saga_type()) {
            return Err(SagaError::DuplicateType(definition.saga_type().to_string()));
        }

        debug!(
            saga_type = definition.saga_type(),
            steps = definition.steps().len(),
            compensatable = definition.compensatable(),
            "registered saga definition"
        );
        self.definitions
            .insert(definition.saga_type().to_string(), Arc::new(definition));
        Ok(())
    }

    /// Replace every definition with `definitions`.
    ///
    /// # Errors
    ///
    /// Fails on the first definition [`register`](Self::register) rejects;
    /// the definitions before it stay registered.
    pub fn reload(
        &mut self,
        definitions: impl IntoIterator<Item = SagaDefinition>,
    ) -> Result<(), SagaError> {
        self.definitions.clear();
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`SagaError::UnknownSagaType`] if the type is not registered.
    pub fn lookup(&self, saga_type: &str) -> Result<Arc<SagaDefinition>, SagaError> {
        self.definitions
            .get(saga_type)
            .cloned()
            .ok_or_else(|| SagaError::UnknownSagaType(saga_type.to_string()))
    }

    /// Re-run the invariant checks on a registered definition.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::UnknownSagaType`] or the violated invariant.
    pub fn validate(&self, saga_type: &str) -> Result<(), SagaError> {
        self.lookup(saga_type)?.validate()
    }

    /// Registered saga types, sorted.
    #[must_use]
    pub fn saga_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Registered definitions in registration order.
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<SagaDefinition>> {
        self.definitions.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Named executor and compensation capabilities.
///
/// Declarative definitions refer to capabilities by key; the keys are
/// resolved here once, when the definition is built.
#[derive(Default)]
pub struct CapabilityRegistry {
    executors: IndexMap<String, Arc<dyn StepExecutor>>,
    compensations: IndexMap<String, Arc<dyn CompensatingAction>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .field("compensations", &self.compensations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_executor(&mut self, key: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(key.into(), executor);
    }

    pub fn register_compensation(
        &mut self,
        key: impl Into<String>,
        compensation: Arc<dyn CompensatingAction>,
    ) {
        self.compensations.insert(key.into(), compensation);
    }

    /// # Errors
    ///
    /// Returns [`SagaError::UnknownExecutor`] if nothing is registered under
    /// `key`.
    pub fn executor(&self, key: &str) -> Result<Arc<dyn StepExecutor>, SagaError> {
        self.executors
            .get(key)
            .cloned()
            .ok_or_else(|| SagaError::UnknownExecutor(key.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`SagaError::UnknownCompensation`] if nothing is registered
    /// under `key`.
    pub fn compensation(&self, key: &str) -> Result<Arc<dyn CompensatingAction>, SagaError> {
        self.compensations
            .get(key)
            .cloned()
            .ok_or_else(|| SagaError::UnknownCompensation(key.to_string()))
    }

    pub fn executor_keys(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    pub fn compensation_keys(&self) -> impl Iterator<Item = &str> {
        self.compensations.keys().map(String::as_str)
    }
}
