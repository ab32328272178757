//! In-memory tenant backend behind the built-in sagas.
//!
//! Every executor and compensation in `sagas.toml` resolves to one of the
//! capabilities registered here. They mutate a shared [`DemoBackend`] so that
//! a run can report which resources a rollback left behind.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use saga_engine::{
    CapabilityRegistry, CompensatingAction, SagaId, StepData, StepError, StepExecutor,
};
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_PLAN: &str = "standard";

#[derive(Debug, Default)]
struct DemoState {
    next_id: u64,
    tenants: BTreeMap<u64, String>,
    subscriptions: BTreeMap<u64, (u64, String)>,
    entitlements: BTreeMap<u64, Vec<String>>,
    messages: Vec<String>,
}

impl DemoState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared in-memory state mutated by the demo capabilities.
#[derive(Debug, Clone, Default)]
pub(crate) struct DemoBackend {
    state: Arc<Mutex<DemoState>>,
}

/// Step names whose executor should fail instead of doing its work.
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultPlan {
    fail_step: Option<String>,
}

impl FaultPlan {
    pub(crate) fn fail_step(step: impl Into<String>) -> Self {
        Self {
            fail_step: Some(step.into()),
        }
    }

    fn check(&self, data: &StepData) -> Result<(), StepError> {
        match &self.fail_step {
            Some(step) if step == data.step_name() => Err(StepError::terminal(format!(
                "injected failure in step '{step}'"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    CreateTenant,
    PurgeTenant,
    ProvisionSubscription,
    GrantEntitlements,
    SendMessage,
}

#[derive(Debug, Clone, Copy)]
enum Undo {
    DeleteTenant,
    CancelSubscription,
    RevokeEntitlements,
}

impl DemoBackend {
    /// Register every demo capability under the keys `sagas.toml` refers to.
    pub(crate) fn capabilities(&self, faults: &FaultPlan) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        for (key, operation) in [
            ("tenant.create", Operation::CreateTenant),
            ("tenant.purge", Operation::PurgeTenant),
            ("subscription.provision", Operation::ProvisionSubscription),
            ("entitlements.grant", Operation::GrantEntitlements),
            ("welcome.send", Operation::SendMessage),
        ] {
            registry.register_executor(
                key,
                Arc::new(DemoExecutor {
                    backend: self.clone(),
                    operation,
                    faults: faults.clone(),
                }),
            );
        }
        for (key, undo) in [
            ("tenant.delete", Undo::DeleteTenant),
            ("subscription.cancel", Undo::CancelSubscription),
            ("entitlements.revoke", Undo::RevokeEntitlements),
        ] {
            registry.register_compensation(
                key,
                Arc::new(DemoCompensation {
                    backend: self.clone(),
                    undo,
                }),
            );
        }
        registry
    }

    /// Resources that still exist, one line each.
    pub(crate) fn resources(&self) -> Vec<String> {
        let state = self.lock();
        let tenants = state
            .tenants
            .iter()
            .map(|(id, name)| format!("tenant #{id} '{name}'"));
        let subscriptions = state
            .subscriptions
            .iter()
            .map(|(id, (tenant, plan))| {
                format!("subscription #{id} ({plan}) for tenant #{tenant}")
            });
        let entitlements = state
            .entitlements
            .iter()
            .map(|(tenant, features)| {
                format!("entitlements for tenant #{tenant}: {}", features.join(", "))
            });
        tenants.chain(subscriptions).chain(entitlements).collect()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.lock().messages.clone()
    }

    fn lock(&self) -> MutexGuard<'_, DemoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_tenant(&self, data: &StepData) -> Result<Value, StepError> {
        let name = tenant_name(data)?;
        let mut state = self.lock();
        if state.tenants.values().any(|existing| existing == name) {
            return Err(StepError::terminal(format!("tenant '{name}' already exists")));
        }
        let id = state.allocate_id();
        state.tenants.insert(id, name.to_string());
        debug!(tenant_id = id, tenant = name, "created tenant");
        Ok(json!({"tenant_id": id, "tenant": name}))
    }

    fn purge_tenant(&self, data: &StepData) -> Result<Value, StepError> {
        let name = tenant_name(data)?;
        let mut state = self.lock();
        let ids: Vec<u64> = state
            .tenants
            .iter()
            .filter(|(_, existing)| existing.as_str() == name)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            state.tenants.remove(id);
            state.entitlements.remove(id);
            state.subscriptions.retain(|_, (tenant, _)| tenant != id);
        }
        debug!(tenant = name, purged = ids.len(), "purged tenant");
        Ok(json!({"tenant": name, "purged": ids.len()}))
    }

    fn provision_subscription(&self, data: &StepData) -> Result<Value, StepError> {
        let tenant_id = tenant_id(data)?;
        let plan = data
            .payload()
            .get("plan")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PLAN);
        let mut state = self.lock();
        let id = state.allocate_id();
        state.subscriptions.insert(id, (tenant_id, plan.to_string()));
        debug!(subscription_id = id, tenant_id, plan, "provisioned subscription");
        Ok(json!({"subscription_id": id, "tenant_id": tenant_id, "plan": plan}))
    }

    fn grant_entitlements(&self, data: &StepData) -> Result<Value, StepError> {
        let tenant_id = tenant_id(data)?;
        let plan = data
            .prior_results()
            .values()
            .find_map(|result| result.get("plan").and_then(Value::as_str))
            .unwrap_or(DEFAULT_PLAN);
        let features: Vec<String> = match plan {
            "enterprise" => vec!["dashboard", "api", "sso", "audit_log"],
            "pro" => vec!["dashboard", "api"],
            _ => vec!["dashboard"],
        }
        .into_iter()
        .map(String::from)
        .collect();
        self.lock().entitlements.insert(tenant_id, features.clone());
        debug!(tenant_id, ?features, "granted entitlements");
        Ok(json!({"tenant_id": tenant_id, "entitlements": features}))
    }

    fn send_message(&self, data: &StepData) -> Result<Value, StepError> {
        let name = tenant_name(data)?;
        let message = format!("{} -> {name}", data.step_name());
        self.lock().messages.push(message.clone());
        Ok(json!({"sent": message}))
    }

    fn undo(&self, undo: Undo, result: &Value) -> Result<(), StepError> {
        let mut state = self.lock();
        match undo {
            Undo::DeleteTenant => {
                let id = result_id(result, "tenant_id")?;
                state.tenants.remove(&id);
                debug!(tenant_id = id, "deleted tenant");
            }
            Undo::CancelSubscription => {
                let id = result_id(result, "subscription_id")?;
                state.subscriptions.remove(&id);
                debug!(subscription_id = id, "cancelled subscription");
            }
            Undo::RevokeEntitlements => {
                let id = result_id(result, "tenant_id")?;
                state.entitlements.remove(&id);
                debug!(tenant_id = id, "revoked entitlements");
            }
        }
        Ok(())
    }
}

fn tenant_name(data: &StepData) -> Result<&str, StepError> {
    data.payload()
        .get("tenant")
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::terminal("payload has no 'tenant' name"))
}

fn tenant_id(data: &StepData) -> Result<u64, StepError> {
    data.prior_results()
        .values()
        .find_map(|result| result.get("tenant_id").and_then(Value::as_u64))
        .ok_or_else(|| StepError::terminal("no earlier step created a tenant"))
}

fn result_id(result: &Value, field: &str) -> Result<u64, StepError> {
    result
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| StepError::terminal(format!("step result has no '{field}'")))
}

struct DemoExecutor {
    backend: DemoBackend,
    operation: Operation,
    faults: FaultPlan,
}

#[async_trait]
impl StepExecutor for DemoExecutor {
    async fn execute(&self, data: &StepData, _saga_id: SagaId) -> Result<Value, StepError> {
        self.faults.check(data)?;
        match self.operation {
            Operation::CreateTenant => self.backend.create_tenant(data),
            Operation::PurgeTenant => self.backend.purge_tenant(data),
            Operation::ProvisionSubscription => self.backend.provision_subscription(data),
            Operation::GrantEntitlements => self.backend.grant_entitlements(data),
            Operation::SendMessage => self.backend.send_message(data),
        }
    }
}

struct DemoCompensation {
    backend: DemoBackend,
    undo: Undo,
}

#[async_trait]
impl CompensatingAction for DemoCompensation {
    async fn compensate(&self, step_result: &Value, _saga_id: SagaId) -> Result<(), StepError> {
        self.backend.undo(self.undo, step_result)
    }

    fn description(&self) -> Option<String> {
        let description = match self.undo {
            Undo::DeleteTenant => "delete the tenant",
            Undo::CancelSubscription => "cancel the subscription",
            Undo::RevokeEntitlements => "revoke granted entitlements",
        };
        Some(description.to_string())
    }
}
