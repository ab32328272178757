use std::path::PathBuf;

use saga_engine::{SagaError, SagaId, SagaStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read config file '{path}'")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file")]
    ParseConfig(#[from] toml::de::Error),

    #[error("saga engine error")]
    Saga(#[from] SagaError),

    #[error("payload is not valid JSON")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("failed to render output")]
    Render(#[from] serde_json::Error),

    #[error("failed to start async runtime")]
    Runtime(#[source] std::io::Error),

    #[error("saga type '{saga_type}' has no step named '{step}'")]
    UnknownStep { saga_type: String, step: String },

    #[error("{0} saga definition(s) failed validation")]
    ValidationFailed(usize),

    #[error("saga {saga_id} finished {status}")]
    NotCompleted { saga_id: SagaId, status: SagaStatus },
}

pub type Result<T> = std::result::Result<T, CliError>;
