use saga_engine::{DefinitionRegistry, SagaDeclaration, SagaError};

use crate::capabilities::{DemoBackend, FaultPlan};
use crate::config::CliConfig;
use crate::error::{CliError, Result};

pub(crate) fn run(config: &CliConfig, saga_type: Option<&str>) -> Result<()> {
    let declarations: Vec<&SagaDeclaration> = match saga_type {
        Some(saga_type) => {
            let declaration = config
                .saga(saga_type)
                .ok_or_else(|| SagaError::UnknownSagaType(saga_type.to_string()))?;
            vec![declaration]
        }
        None => config.sagas().iter().collect(),
    };

    if declarations.is_empty() {
        println!("No sagas defined.");
        return Ok(());
    }

    let capabilities = DemoBackend::default().capabilities(&FaultPlan::default());
    let mut registry = DefinitionRegistry::new();
    let mut failures = 0;

    for declaration in declarations {
        let outcome = declaration
            .resolve(&capabilities)
            .and_then(|definition| registry.register(definition));
        match outcome {
            Ok(()) => println!("✓ {}", declaration.saga_type),
            Err(e) => {
                failures += 1;
                println!("✗ {}: {e}", declaration.saga_type);
            }
        }
    }

    if failures > 0 {
        return Err(CliError::ValidationFailed(failures));
    }
    Ok(())
}
