//! Ready-made operations bound to a [`ControlPlane`] handle.
//!
//! Each one captures a resource kind and name, so a workflow step can hold
//! it as a zero-argument call and the runner only supplies dependency
//! descriptors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::traits::{ControlPlane, Idempotency, LatencyClass, Operation, OperationInput};
use crate::{OpError, ResourceDescriptor, ResourceKind};

/// Copies a dependency's identifier into a spec field before the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub field: String,
    pub step: String,
}

// ---------------------------------------------------------------------------
// CreateResource
// ---------------------------------------------------------------------------

pub struct CreateResource {
    plane: Arc<dyn ControlPlane>,
    kind: ResourceKind,
    name: String,
    spec: Value,
    bindings: Vec<Binding>,
    label: String,
    latency: LatencyClass,
}

impl CreateResource {
    pub fn new(
        plane: Arc<dyn ControlPlane>,
        kind: ResourceKind,
        name: impl Into<String>,
        spec: Value,
    ) -> Self {
        let name = name.into();
        Self {
            label: format!("create {kind} '{name}'"),
            plane,
            kind,
            name,
            spec,
            bindings: Vec::new(),
            latency: LatencyClass::Fast,
        }
    }

    /// Set `field` in the spec to the identifier produced by step `step`.
    pub fn bind(mut self, field: impl Into<String>, step: impl Into<String>) -> Self {
        self.bindings.push(Binding {
            field: field.into(),
            step: step.into(),
        });
        self
    }

    pub fn slow(mut self) -> Self {
        self.latency = LatencyClass::Slow;
        self
    }

    /// Resolve bindings against `input` and return the spec to send.
    pub fn resolved_spec(&self, input: &OperationInput) -> Result<Value, OpError> {
        if self.bindings.is_empty() {
            return Ok(self.spec.clone());
        }

        let mut spec = match &self.spec {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map.clone(),
            _ => {
                return Err(OpError::Fatal(format!(
                    "spec for {} must be an object to accept bindings",
                    self.label
                )))
            }
        };

        for binding in &self.bindings {
            let dep = input.dependency(&binding.step)?;
            spec.insert(binding.field.clone(), Value::String(dep.id.clone()));
        }

        Ok(Value::Object(spec))
    }
}

#[async_trait]
impl Operation for CreateResource {
    fn name(&self) -> &str {
        &self.label
    }

    fn idempotency(&self) -> Idempotency {
        Idempotency::CreateOrAdopt
    }

    fn latency_class(&self) -> LatencyClass {
        self.latency
    }

    async fn call(&self, input: &OperationInput) -> Result<ResourceDescriptor, OpError> {
        let spec = self.resolved_spec(input)?;
        debug!(kind = %self.kind, name = %self.name, "create request");
        self.plane.create(self.kind, &self.name, &spec).await
    }
}

// ---------------------------------------------------------------------------
// LookupResource
// ---------------------------------------------------------------------------

pub struct LookupResource {
    plane: Arc<dyn ControlPlane>,
    kind: ResourceKind,
    name: String,
    label: String,
}

impl LookupResource {
    pub fn new(plane: Arc<dyn ControlPlane>, kind: ResourceKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: format!("lookup {kind} '{name}'"),
            plane,
            kind,
            name,
        }
    }
}

#[async_trait]
impl Operation for LookupResource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn call(&self, _input: &OperationInput) -> Result<ResourceDescriptor, OpError> {
        self.plane.lookup(self.kind, &self.name).await
    }
}

// ---------------------------------------------------------------------------
// DeleteResource
// ---------------------------------------------------------------------------

/// Deletes the descriptor handed to it as the teardown target.
pub struct DeleteResource {
    plane: Arc<dyn ControlPlane>,
    kind: ResourceKind,
    label: String,
}

impl DeleteResource {
    pub fn new(plane: Arc<dyn ControlPlane>, kind: ResourceKind) -> Self {
        Self {
            label: format!("delete {kind}"),
            plane,
            kind,
        }
    }
}

#[async_trait]
impl Operation<()> for DeleteResource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn call(&self, input: &OperationInput) -> Result<(), OpError> {
        let target = input.target()?;
        self.plane.delete(self.kind, &target.id).await
    }
}
