//! `InMemoryControlPlane`: a process-local control plane with fault injection.
//!
//! Backs the CLI demos and the engine tests. Resources are keyed by
//! `(kind, name)`; identifiers look like `arn:mem:<kind>/<name>`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::traits::ControlPlane;
use crate::{ErrorKind, OpError, ResourceDescriptor, ResourceKind};

/// Which of the three call shapes was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Create,
    Lookup,
    Delete,
}

/// One recorded call. `key` is the name for create/lookup and the id for delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub call: CallKind,
    pub kind: ResourceKind,
    pub key: String,
}

struct Fault {
    call: CallKind,
    kind: ResourceKind,
    error: ErrorKind,
    remaining: u32,
}

#[derive(Default)]
struct State {
    resources: BTreeMap<(ResourceKind, String), ResourceDescriptor>,
    faults: Vec<Fault>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_id(kind: ResourceKind, name: &str) -> String {
        format!("arn:mem:{kind}/{name}")
    }

    /// Pre-create a resource, as if left over from an earlier run.
    pub fn seed(&self, kind: ResourceKind, name: &str) -> ResourceDescriptor {
        let descriptor = ResourceDescriptor::new(kind, name, Self::make_id(kind, name))
            .with_metadata("seeded", true);
        self.state()
            .resources
            .insert((kind, name.to_owned()), descriptor.clone());
        descriptor
    }

    /// Make the next `times` calls of shape `call` on `kind` fail with `error`.
    pub fn inject(&self, call: CallKind, kind: ResourceKind, error: ErrorKind, times: u32) {
        self.state().faults.push(Fault {
            call,
            kind,
            error,
            remaining: times,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.state().resources.contains_key(&(kind, name.to_owned()))
    }

    pub fn resources(&self) -> Vec<ResourceDescriptor> {
        self.state().resources.values().cloned().collect()
    }

    /// Record the call, then consume a matching fault if one is armed.
    fn enter(state: &mut State, call: CallKind, kind: ResourceKind, key: &str) -> Result<(), OpError> {
        state.calls.push(Call {
            call,
            kind,
            key: key.to_owned(),
        });

        let fault = state
            .faults
            .iter_mut()
            .find(|f| f.call == call && f.kind == kind && f.remaining > 0);

        match fault {
            Some(fault) => {
                fault.remaining -= 1;
                debug!(?call, %kind, key, error = %fault.error, "injected fault");
                Err(OpError::of_kind(fault.error, format!("{kind} '{key}'")))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        spec: &Value,
    ) -> Result<ResourceDescriptor, OpError> {
        let mut state = self.state();
        Self::enter(&mut state, CallKind::Create, kind, name)?;

        let key = (kind, name.to_owned());
        if state.resources.contains_key(&key) && !kind.is_attachment() {
            return Err(OpError::AlreadyExists(name.to_owned()));
        }

        let mut descriptor = ResourceDescriptor::new(kind, name, Self::make_id(kind, name));
        if let Value::Object(fields) = spec {
            descriptor.metadata.extend(fields.clone());
        }
        state.resources.insert(key, descriptor.clone());
        Ok(descriptor)
    }

    async fn lookup(&self, kind: ResourceKind, name: &str) -> Result<ResourceDescriptor, OpError> {
        let mut state = self.state();
        Self::enter(&mut state, CallKind::Lookup, kind, name)?;

        state
            .resources
            .get(&(kind, name.to_owned()))
            .cloned()
            .ok_or_else(|| OpError::NotFound(name.to_owned()))
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), OpError> {
        let mut state = self.state();
        Self::enter(&mut state, CallKind::Delete, kind, id)?;

        let key = state
            .resources
            .iter()
            .find(|((k, _), d)| *k == kind && d.id == id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| OpError::NotFound(id.to_owned()))?;

        state.resources.remove(&key);
        Ok(())
    }
}
