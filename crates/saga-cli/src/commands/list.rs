use saga_engine::{DefinitionRegistry, SagaDefinition, StepUnit};

use crate::capabilities::{DemoBackend, FaultPlan};
use crate::config::CliConfig;
use crate::error::Result;

pub(crate) fn run(config: &CliConfig) -> Result<()> {
    let capabilities = DemoBackend::default().capabilities(&FaultPlan::default());
    let registry = config.build_registry(&capabilities)?;

    print_definitions(&registry);

    Ok(())
}

fn print_definitions(registry: &DefinitionRegistry) {
    if registry.is_empty() {
        println!("No sagas defined.");
        return;
    }

    for saga_type in registry.saga_types() {
        let Ok(definition) = registry.lookup(saga_type) else {
            continue;
        };
        print_definition(&definition);
    }
}

fn print_definition(definition: &SagaDefinition) {
    let steps = definition.steps().len();
    let noun = if steps == 1 { "step" } else { "steps" };
    println!("{} ({steps} {noun})", definition.saga_type());
    if !definition.description().is_empty() {
        println!("  {}", definition.description());
    }
    if !definition.compensatable() {
        println!("  no rollback on failure");
    }

    for (index, step) in definition.steps().iter().enumerate() {
        println!("  {}. {}{}", index + 1, step.name(), step_flags(step));
    }
    println!();
}

fn step_flags(step: &StepUnit) -> String {
    let mut flags = Vec::new();
    if step.has_compensation() {
        flags.push("compensated");
    }
    if !step.is_critical() {
        flags.push("optional");
    }
    if step.is_async() {
        flags.push("async");
    }

    if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    }
}
