use saga_engine::{SagaInstance, SagaStatus};

pub(crate) trait InstanceFormatter {
    fn format_instance(&self, instance: &SagaInstance) -> String;
}

pub(crate) struct PlainTextInstanceFormatter;

impl PlainTextInstanceFormatter {
    fn format_header(output: &mut String, instance: &SagaInstance) {
        output.push_str(&format!(
            "Saga {} ({}): {}\n",
            instance.saga_id(),
            instance.saga_type(),
            instance.status()
        ));
        if instance.attempt() > 1 {
            output.push_str(&format!("Attempt: {}\n", instance.attempt()));
        }
    }

    fn format_steps(output: &mut String, instance: &SagaInstance) {
        let summary = instance.audit().summary();
        if summary.is_empty() {
            return;
        }

        output.push('\n');
        output.push_str("Steps:\n");
        for line in summary.lines() {
            output.push_str(&format!("  {line}\n"));
        }
    }

    fn format_error(output: &mut String, instance: &SagaInstance) {
        let Some(error) = instance.error() else {
            return;
        };

        output.push('\n');
        output.push_str(&format!("Error: {error}\n"));
    }

    fn format_skipped_compensations(output: &mut String, instance: &SagaInstance) {
        if !instance.is_partially_compensated() {
            return;
        }

        output.push('\n');
        output.push_str("Warning: Steps left in place (no compensation):\n");
        for step in instance.skipped_compensations() {
            output.push_str(&format!("  {step}\n"));
        }
    }

    fn format_duration(output: &mut String, instance: &SagaInstance) {
        if instance.status() != SagaStatus::Completed {
            return;
        }
        let Some(completed_at) = instance.completed_at() else {
            return;
        };

        let elapsed = completed_at - instance.created_at();
        output.push_str(&format!(
            "\nCompleted in {}ms\n",
            elapsed.num_milliseconds()
        ));
    }
}

impl InstanceFormatter for PlainTextInstanceFormatter {
    fn format_instance(&self, instance: &SagaInstance) -> String {
        let mut output = String::new();

        Self::format_header(&mut output, instance);
        Self::format_steps(&mut output, instance);
        Self::format_error(&mut output, instance);
        Self::format_skipped_compensations(&mut output, instance);
        Self::format_duration(&mut output, instance);

        output
    }
}
