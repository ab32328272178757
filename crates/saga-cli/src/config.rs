use std::fs;
use std::path::Path;

use saga_engine::{CapabilityRegistry, CoordinatorConfig, DefinitionRegistry, SagaDeclaration};
use serde::Deserialize;
use tracing::debug;

use crate::error::{CliError, Result};

/// Configuration used when no `--config` file is given.
pub(crate) const BUILTIN_CONFIG: &str = include_str!("../sagas.toml");

/// Contents of a saga config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CliConfig {
    #[serde(default)]
    coordinator: CoordinatorConfig,
    #[serde(default, rename = "saga")]
    sagas: Vec<SagaDeclaration>,
}

impl CliConfig {
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("using built-in saga config");
            return Self::parse(BUILTIN_CONFIG);
        };

        debug!(path = %path.display(), "loading saga config");
        let content = fs::read_to_string(path).map_err(|source| CliError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub(crate) fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub(crate) fn coordinator(&self) -> &CoordinatorConfig {
        &self.coordinator
    }

    pub(crate) fn sagas(&self) -> &[SagaDeclaration] {
        &self.sagas
    }

    pub(crate) fn saga(&self, saga_type: &str) -> Option<&SagaDeclaration> {
        self.sagas.iter().find(|saga| saga.saga_type == saga_type)
    }

    /// Resolve and register every declared saga.
    pub(crate) fn build_registry(
        &self,
        capabilities: &CapabilityRegistry,
    ) -> Result<DefinitionRegistry> {
        let mut registry = DefinitionRegistry::new();
        for declaration in &self.sagas {
            registry.register(declaration.resolve(capabilities)?)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::capabilities::{DemoBackend, FaultPlan};

    #[test]
    fn builtin_config_parses() {
        let config = CliConfig::parse(BUILTIN_CONFIG).expect("built-in config is valid");

        assert!(config.saga("tenant_onboarding").is_some());
        assert!(config.saga("tenant_offboarding").is_some());
        assert_eq!(config.coordinator().backoff_base(), Duration::from_millis(100));
    }

    #[test]
    fn builtin_sagas_resolve_against_demo_capabilities() {
        let config = CliConfig::parse(BUILTIN_CONFIG).expect("built-in config is valid");
        let capabilities = DemoBackend::default().capabilities(&FaultPlan::default());

        let registry = config
            .build_registry(&capabilities)
            .expect("built-in sagas register");

        assert_eq!(
            registry.saga_types(),
            ["tenant_offboarding", "tenant_onboarding"]
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = CliConfig::parse("").expect("empty config is valid");

        assert!(config.sagas().is_empty());
        assert_eq!(config.coordinator(), &CoordinatorConfig::default());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let result = CliConfig::parse("[sagas]\n");

        assert!(matches!(result, Err(CliError::ParseConfig(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = CliConfig::load(Some(Path::new("/nonexistent/sagas.toml")))
            .expect_err("file does not exist");

        assert!(matches!(err, CliError::ReadConfig { .. }));
    }
}
