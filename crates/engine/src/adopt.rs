//! Create-or-adopt: a name collision with a resource left over from an
//! earlier run is resolved by looking the existing resource up and using it.

use tracing::{info, warn};

use controlplane::{OpError, Operation, OperationInput, ResourceDescriptor};

use crate::backoff::{BackoffExecutor, RetryStats};

/// Create a resource, or adopt the existing one on `AlreadyExists`.
///
/// Both calls go through `executor`. If the lookup fails too, the lookup
/// error is returned; any other creation error is returned unchanged.
pub async fn create_or_adopt(
    executor: &BackoffExecutor,
    create: &dyn Operation,
    lookup: &dyn Operation,
    input: &OperationInput,
) -> Result<ResourceDescriptor, OpError> {
    create_or_adopt_with_stats(executor, create, Some(lookup), input)
        .await
        .0
}

/// As [`create_or_adopt`], with an optional lookup and the combined attempt
/// count of both calls. Without a lookup the conflict is returned as-is.
pub(crate) async fn create_or_adopt_with_stats(
    executor: &BackoffExecutor,
    create: &dyn Operation,
    lookup: Option<&dyn Operation>,
    input: &OperationInput,
) -> (Result<ResourceDescriptor, OpError>, RetryStats) {
    let (created, create_stats) = executor.execute_operation(create, input).await;

    let conflict = match created {
        Err(err @ OpError::AlreadyExists(_)) => err,
        other => return (other, create_stats),
    };

    let Some(lookup) = lookup else {
        warn!(operation = create.name(), "{conflict}; no lookup available to adopt it");
        return (Err(conflict), create_stats);
    };

    info!(
        operation = create.name(),
        lookup = lookup.name(),
        "{conflict}; adopting the existing resource"
    );

    let (found, lookup_stats) = executor.execute_operation(lookup, input).await;
    match &found {
        Ok(descriptor) => info!(id = %descriptor.id, "adopted existing resource"),
        Err(err) => warn!(lookup = lookup.name(), error = %err, "lookup after conflict failed"),
    }

    (found, create_stats.merge(lookup_stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RetryPolicy;
    use controlplane::mock::{MockBehaviour, MockOperation};
    use controlplane::{ErrorKind, ResourceKind};

    fn executor() -> BackoffExecutor {
        BackoffExecutor::new(RetryPolicy::default())
    }

    fn existing() -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Role, "demo-role", "arn:old:role/demo-role")
            .with_metadata("created", "2026-01-01")
    }

    #[tokio::test(start_paused = true)]
    async fn created_descriptor_is_returned_on_success() {
        let create = MockOperation::creating("create", ResourceKind::Role, "demo-role");
        let lookup = MockOperation::returning("lookup", existing());

        let got = create_or_adopt(&executor(), &create, &lookup, &OperationInput::default())
            .await
            .unwrap();

        assert_eq!(got.id, "arn:mock:role/demo-role");
        assert_eq!(create.call_count(), 1);
        assert_eq!(lookup.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_adopts_looked_up_descriptor_unchanged() {
        let create: MockOperation = MockOperation::failing("create", ErrorKind::AlreadyExists);
        let lookup = MockOperation::returning("lookup", existing());

        let got = create_or_adopt(&executor(), &create, &lookup, &OperationInput::default())
            .await
            .unwrap();

        assert_eq!(got, existing());
        assert_eq!(create.call_count(), 1);
        assert_eq!(lookup.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_failure_after_conflict_is_surfaced() {
        let create: MockOperation = MockOperation::failing("create", ErrorKind::AlreadyExists);
        let lookup: MockOperation = MockOperation::failing("lookup", ErrorKind::NotFound);

        let err = create_or_adopt(&executor(), &create, &lookup, &OperationInput::default())
            .await
            .unwrap_err();

        assert_eq!(err, OpError::NotFound("lookup".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn other_creation_errors_skip_the_lookup() {
        let create: MockOperation = MockOperation::failing("create", ErrorKind::Fatal);
        let lookup = MockOperation::returning("lookup", existing());

        let err = create_or_adopt(&executor(), &create, &lookup, &OperationInput::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(lookup.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_without_lookup_is_returned() {
        let create: MockOperation = MockOperation::failing("create", ErrorKind::AlreadyExists);

        let (result, stats) =
            create_or_adopt_with_stats(&executor(), &create, None, &OperationInput::default()).await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::AlreadyExists);
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_cover_both_calls() {
        let create = MockOperation::scripted(
            "create",
            vec![
                MockBehaviour::Fail(ErrorKind::Transient),
                MockBehaviour::Fail(ErrorKind::AlreadyExists),
            ],
            MockBehaviour::Succeed(existing()),
        );
        let lookup = MockOperation::returning("lookup", existing());

        let (result, stats) = create_or_adopt_with_stats(
            &executor(),
            &create,
            Some(&lookup as &dyn Operation),
            &OperationInput::default(),
        )
        .await;

        assert_eq!(result, Ok(existing()));
        assert_eq!(stats.attempts, 3);
        assert_eq!(lookup.call_count(), 1);
    }
}
