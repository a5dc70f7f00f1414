//! The `Operation` and `ControlPlane` traits: the seams between the
//! orchestration core and the remote API.

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{OpError, ResourceDescriptor, ResourceKind};

/// Whether an operation may be invoked more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Idempotency {
    /// Repeating the call may duplicate its effect; never retried.
    None,
    /// A repeat either succeeds or reports `AlreadyExists`.
    CreateOrAdopt,
    /// Repeating the call has no additional effect (lookups, deletes, puts).
    NaturallyIdempotent,
}

/// Rough latency expectation, carried into logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    Fast,
    Slow,
}

/// Everything an operation may read when it is invoked.
///
/// Built by the workflow runner from descriptors produced by earlier steps.
#[derive(Debug, Clone, Default)]
pub struct OperationInput {
    /// Descriptors of the steps this one depends on, keyed by step name.
    pub dependencies: BTreeMap<String, ResourceDescriptor>,
    /// For teardown operations: the descriptor the step produced.
    pub target: Option<ResourceDescriptor>,
}

impl OperationInput {
    pub fn dependency(&self, step: &str) -> Result<&ResourceDescriptor, OpError> {
        self.dependencies
            .get(step)
            .ok_or_else(|| OpError::NotFound(format!("dependency '{step}'")))
    }

    pub fn target(&self) -> Result<&ResourceDescriptor, OpError> {
        self.target
            .as_ref()
            .ok_or_else(|| OpError::NotFound("teardown target".into()))
    }
}

/// A named, side-effecting call against the control plane.
///
/// All parameters are captured by the implementor; the only runtime input is
/// the [`OperationInput`] resolved by the runner. `T` is the success value:
/// a [`ResourceDescriptor`] for forward steps, `()` for teardown.
#[async_trait]
pub trait Operation<T = ResourceDescriptor>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn idempotency(&self) -> Idempotency {
        Idempotency::NaturallyIdempotent
    }

    fn latency_class(&self) -> LatencyClass {
        LatencyClass::Fast
    }

    async fn call(&self, input: &OperationInput) -> Result<T, OpError>;
}

/// The remote control plane, seen as three operation shapes per resource kind.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        spec: &Value,
    ) -> Result<ResourceDescriptor, OpError>;

    async fn lookup(&self, kind: ResourceKind, name: &str) -> Result<ResourceDescriptor, OpError>;

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), OpError>;
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// Wraps an async closure as an [`Operation`].
pub struct FnOperation<F> {
    name: String,
    idempotency: Idempotency,
    f: F,
}

/// Build an operation from `f`, which receives an owned copy of the input.
pub fn operation_fn<F>(name: impl Into<String>, f: F) -> FnOperation<F> {
    FnOperation {
        name: name.into(),
        idempotency: Idempotency::NaturallyIdempotent,
        f,
    }
}

impl<F> FnOperation<F> {
    pub fn with_idempotency(mut self, idempotency: Idempotency) -> Self {
        self.idempotency = idempotency;
        self
    }
}

#[async_trait]
impl<T, F, Fut> Operation<T> for FnOperation<F>
where
    T: Send + 'static,
    F: Fn(OperationInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, OpError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn idempotency(&self) -> Idempotency {
        self.idempotency
    }

    async fn call(&self, input: &OperationInput) -> Result<T, OpError> {
        (self.f)(input.clone()).await
    }
}
