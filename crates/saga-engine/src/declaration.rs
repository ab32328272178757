use serde::Deserialize;

use crate::definition::{DEFAULT_RETRY_COUNT, DEFAULT_STEP_TIMEOUT_SECS, SagaDefinition, StepUnit};
use crate::error::SagaError;
use crate::registry::CapabilityRegistry;

/// Serializable form of a [`SagaDefinition`] that names its capabilities by
/// key instead of holding them.
///
/// ```toml
/// type = "tenant_onboarding"
/// global_timeout_secs = 300
///
/// [[steps]]
/// name = "create_tenant"
/// executor = "tenant.create"
/// compensation = "tenant.delete"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SagaDeclaration {
    #[serde(rename = "type")]
    pub saga_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub compensatable: bool,
    #[serde(default)]
    pub global_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub retry_on_failure: bool,
    #[serde(default)]
    pub steps: Vec<StepDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDeclaration {
    pub name: String,
    pub executor: String,
    #[serde(default)]
    pub compensation: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_true")]
    pub critical: bool,
    #[serde(default, rename = "async")]
    pub is_async: bool,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

impl SagaDeclaration {
    /// Resolve every capability key and build the definition.
    ///
    /// The result is not validated; register it to run the invariant checks.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::UnknownExecutor`] or
    /// [`SagaError::UnknownCompensation`] for a key the registry does not
    /// hold, and [`SagaError::InvalidDefinition`] for a step without an
    /// executor key.
    pub fn resolve(&self, capabilities: &CapabilityRegistry) -> Result<SagaDefinition, SagaError> {
        let steps = self
            .steps
            .iter()
            .map(|step| step.resolve(&self.saga_type, capabilities))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SagaDefinition::builder(self.saga_type.clone())
            .description(self.description.clone())
            .steps(steps)
            .compensatable(self.compensatable)
            .global_timeout_secs(self.global_timeout_secs)
            .retry_on_failure(self.retry_on_failure)
            .build())
    }
}

impl StepDeclaration {
    fn resolve(
        &self,
        saga_type: &str,
        capabilities: &CapabilityRegistry,
    ) -> Result<StepUnit, SagaError> {
        if self.executor.trim().is_empty() {
            return Err(SagaError::invalid(
                saga_type,
                format!("step '{}' has no executor", self.name),
            ));
        }

        let mut builder = StepUnit::builder(self.name.clone(), capabilities.executor(&self.executor)?)
            .timeout_secs(self.timeout_secs)
            .retry_count(self.retry_count)
            .critical(self.critical)
            .run_async(self.is_async);
        if let Some(key) = &self.compensation {
            builder = builder.compensation(capabilities.compensation(key)?);
        }
        Ok(builder.build())
    }
}
