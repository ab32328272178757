//! Saga orchestration for multi-step business transactions.
//!
//! A saga is an ordered list of steps, each with a forward operation and an
//! optional compensating action. The [`Coordinator`] runs instances of
//! registered [`SagaDefinition`]s one step at a time, retries retryable
//! failures with exponential backoff and, when a step ultimately fails, undoes
//! the completed steps in reverse order.

mod audit;
mod config;
mod coordinator;
mod declaration;
mod definition;
mod error;
mod execution;
mod instance;
mod observer;
mod registry;
mod step;

pub use audit::{SagaAuditLog, StepRecord, StepStatus};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorBuilder, SagaHandle};
pub use declaration::{SagaDeclaration, StepDeclaration};
pub use definition::{
    DEFAULT_RETRY_COUNT, DEFAULT_STEP_TIMEOUT_SECS, SagaDefinition, SagaDefinitionBuilder,
    StepUnit, StepUnitBuilder,
};
pub use error::{CompensationError, SagaError, StepError, StepFailure};
pub use instance::{SagaId, SagaInstance, SagaStatus};
pub use observer::SagaObserver;
pub use registry::{CapabilityRegistry, DefinitionRegistry};
pub use step::{
    CompensatingAction, FnCompensation, FnExecutor, StepData, StepExecutor,
    compensation_fn, described_compensation_fn, executor_fn,
};
