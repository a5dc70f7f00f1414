//! Declarative workflow plans.
//!
//! A plan is the JSON form of a workflow: each step names a resource kind,
//! a resource name and a spec. Binding a plan to a [`ControlPlane`] turns
//! it into a runnable [`Workflow`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use controlplane::ops::{CreateResource, DeleteResource, LookupResource};
use controlplane::{ControlPlane, ResourceKind};

use crate::chain::check_chain;
use crate::{EngineError, RetryPolicy, Workflow, WorkflowStep};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub name: String,
    /// Default policy for the plan's steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step name, unique within the plan.
    pub id: String,
    pub kind: ResourceKind,
    pub resource_name: String,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Spec field → step whose identifier fills it. Implies a dependency.
    #[serde(default)]
    pub bind: BTreeMap<String, String>,
    /// A non-creation step: no adoption on conflict.
    #[serde(default)]
    pub action: bool,
    /// Delete the resource on teardown.
    #[serde(default = "default_true")]
    pub teardown: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl PlanStep {
    /// `depends_on` plus every bound step, without duplicates.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = self.depends_on.clone();
        for step in self.bind.values() {
            if !deps.contains(step) {
                deps.push(step.clone());
            }
        }
        deps
    }
}

impl WorkflowPlan {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate the plan and return its execution order.
    pub fn validate(&self) -> Result<Vec<String>, EngineError> {
        let deps: Vec<Vec<String>> = self.steps.iter().map(PlanStep::dependencies).collect();
        let order = check_chain(
            &self.name,
            self.steps
                .iter()
                .zip(&deps)
                .map(|(s, d)| (s.id.as_str(), d.as_slice())),
        )?;

        for step in &self.steps {
            if step.resource_name.trim().is_empty() {
                return Err(EngineError::InvalidPlan(format!(
                    "step '{}' has an empty resource name",
                    step.id
                )));
            }
            if !step.bind.is_empty() && !matches!(step.spec, Value::Null | Value::Object(_)) {
                return Err(EngineError::InvalidPlan(format!(
                    "step '{}' binds fields into a spec that is not an object",
                    step.id
                )));
            }
            if let Some(policy) = &step.retry {
                policy.validate()?;
            }
        }
        if let Some(policy) = &self.retry {
            policy.validate()?;
        }

        Ok(order)
    }

    /// Validate and bind every step to `plane`.
    pub fn into_workflow(&self, plane: Arc<dyn ControlPlane>) -> Result<Workflow, EngineError> {
        self.validate()?;

        let mut workflow = Workflow::new(self.name.clone());
        for step in &self.steps {
            let create = step.bind.iter().fold(
                CreateResource::new(plane.clone(), step.kind, &step.resource_name, step.spec.clone()),
                |op, (field, from)| op.bind(field, from),
            );

            let mut built = if step.action {
                WorkflowStep::invoke(&step.id, create)
            } else {
                WorkflowStep::create_or_adopt(
                    &step.id,
                    create,
                    LookupResource::new(plane.clone(), step.kind, &step.resource_name),
                )
            }
            .depends_on(step.dependencies());

            if step.teardown {
                built = built.with_teardown(DeleteResource::new(plane.clone(), step.kind));
            }
            if let Some(policy) = step.retry.clone().or_else(|| self.retry.clone()) {
                built = built.with_policy(policy);
            }

            workflow = workflow.step(built);
        }

        Ok(workflow)
    }
}
