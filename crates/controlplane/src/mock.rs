//! `MockOperation`: a test double for [`Operation`].
//!
//! Plays back a script of outcomes, then repeats a final behaviour forever.
//! Every call is recorded together with the input it saw.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::traits::{Idempotency, Operation, OperationInput};
use crate::{ErrorKind, OpError, ResourceDescriptor, ResourceKind};

/// What a single call to a `MockOperation` does.
#[derive(Debug, Clone)]
pub enum MockBehaviour<T> {
    Succeed(T),
    Fail(ErrorKind),
}

/// A mock operation that records every call it receives.
pub struct MockOperation<T = ResourceDescriptor> {
    /// Label used in logs and test assertions.
    pub name: String,
    script: Mutex<VecDeque<MockBehaviour<T>>>,
    then: MockBehaviour<T>,
    idempotency: Idempotency,
    /// Inputs seen by this operation, in call order.
    pub calls: Arc<Mutex<Vec<OperationInput>>>,
}

impl<T: Clone> MockOperation<T> {
    /// Always succeed with `value`.
    pub fn returning(name: impl Into<String>, value: T) -> Self {
        Self::scripted(name, Vec::new(), MockBehaviour::Succeed(value))
    }

    /// Always fail with an error of `kind`.
    pub fn failing(name: impl Into<String>, kind: ErrorKind) -> Self {
        Self::scripted(name, Vec::new(), MockBehaviour::Fail(kind))
    }

    /// Fail `times` times with `kind`, then succeed with `value`.
    pub fn failing_then(name: impl Into<String>, kind: ErrorKind, times: usize, value: T) -> Self {
        Self::scripted(
            name,
            vec![MockBehaviour::Fail(kind); times],
            MockBehaviour::Succeed(value),
        )
    }

    /// Play `script` in order, then repeat `then`.
    pub fn scripted(
        name: impl Into<String>,
        script: Vec<MockBehaviour<T>>,
        then: MockBehaviour<T>,
    ) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script.into()),
            then,
            idempotency: Idempotency::NaturallyIdempotent,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_idempotency(mut self, idempotency: Idempotency) -> Self {
        self.idempotency = idempotency;
        self
    }

    /// Number of times this operation has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_behaviour(&self) -> MockBehaviour<T> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.then.clone())
    }
}

impl MockOperation<ResourceDescriptor> {
    /// Shorthand: succeed with a descriptor for `kind`/`name`.
    pub fn creating(op_name: impl Into<String>, kind: ResourceKind, name: &str) -> Self {
        Self::returning(
            op_name,
            ResourceDescriptor::new(kind, name, format!("arn:mock:{kind}/{name}")),
        )
    }
}

#[async_trait]
impl<T> Operation<T> for MockOperation<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn idempotency(&self) -> Idempotency {
        self.idempotency
    }

    async fn call(&self, input: &OperationInput) -> Result<T, OpError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(input.clone());

        match self.next_behaviour() {
            MockBehaviour::Succeed(value) => Ok(value),
            MockBehaviour::Fail(kind) => Err(OpError::of_kind(kind, self.name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_plays_then_repeats_final_behaviour() {
        let op = MockOperation::failing_then("flaky", ErrorKind::Transient, 2, 7u32);
        let input = OperationInput::default();

        assert!(matches!(op.call(&input).await, Err(OpError::Transient(_))));
        assert!(matches!(op.call(&input).await, Err(OpError::Transient(_))));
        assert_eq!(op.call(&input).await, Ok(7));
        assert_eq!(op.call(&input).await, Ok(7));
        assert_eq!(op.call_count(), 4);
    }

    #[tokio::test]
    async fn failing_mock_never_succeeds() {
        let op: MockOperation<()> = MockOperation::failing("boom", ErrorKind::Fatal);
        for _ in 0..3 {
            assert_eq!(
                op.call(&OperationInput::default()).await,
                Err(OpError::Fatal("boom".into()))
            );
        }
    }
}
