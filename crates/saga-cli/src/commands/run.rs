use clap::Args;
use saga_engine::{Coordinator, SagaInstance, SagaStatus};
use serde_json::Value;
use tracing::info;

use crate::capabilities::{DemoBackend, FaultPlan};
use crate::config::CliConfig;
use crate::error::{CliError, Result};
use crate::output::{InstanceFormatter, PlainTextInstanceFormatter};

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Saga type to start
    saga_type: String,

    /// Initial payload as a JSON document
    #[arg(long, default_value = r#"{"tenant": "acme"}"#)]
    payload: String,

    /// Make the named step fail terminally to exercise compensation
    #[arg(long, value_name = "STEP")]
    fail_step: Option<String>,

    /// Print the final instance snapshot as JSON
    #[arg(long)]
    json: bool,
}

pub(crate) fn run(config: &CliConfig, args: &RunArgs) -> Result<()> {
    let payload: Value = serde_json::from_str(&args.payload).map_err(CliError::InvalidPayload)?;

    let backend = DemoBackend::default();
    let faults = match &args.fail_step {
        Some(step) => FaultPlan::fail_step(step),
        None => FaultPlan::default(),
    };
    let registry = config.build_registry(&backend.capabilities(&faults))?;

    let definition = registry.lookup(&args.saga_type)?;
    let unknown_step = args
        .fail_step
        .as_ref()
        .filter(|step| !definition.steps().iter().any(|unit| unit.name() == step.as_str()));
    if let Some(step) = unknown_step {
        return Err(CliError::UnknownStep {
            saga_type: args.saga_type.clone(),
            step: step.clone(),
        });
    }

    let coordinator = Coordinator::builder(registry)
        .config(config.coordinator().clone())
        .build();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .map_err(CliError::Runtime)?;
    let instance = runtime.block_on(async {
        let mut handle = coordinator.start(&args.saga_type, payload).await?;
        info!(saga_id = %handle.saga_id(), "waiting for saga to finish");
        Ok::<_, CliError>(handle.finished().await)
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&instance)?);
    } else {
        print_outcome(&instance, &backend);
    }

    if instance.status() != SagaStatus::Completed {
        return Err(CliError::NotCompleted {
            saga_id: instance.saga_id(),
            status: instance.status(),
        });
    }
    Ok(())
}

fn print_outcome(instance: &SagaInstance, backend: &DemoBackend) {
    print!("{}", PlainTextInstanceFormatter.format_instance(instance));

    let messages = backend.messages();
    if !messages.is_empty() {
        println!();
        println!("Messages sent:");
        for message in &messages {
            println!("  {message}");
        }
    }

    let resources = backend.resources();
    println!();
    if resources.is_empty() {
        println!("No resources left behind.");
    } else {
        println!("Resources left behind:");
        for resource in &resources {
            println!("  {resource}");
        }
    }
}
