//! Retry with exponential back-off.
//!
//! A freshly created resource is not immediately usable as a dependency by
//! the control plane, so calls that depend on it fail transiently for a
//! while. `BackoffExecutor` repeats such calls with a doubling delay until
//! they succeed, fail for a non-retryable reason, or the elapsed-time budget
//! of the [`RetryPolicy`] runs out.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use controlplane::{ErrorKind, Idempotency, Operation, OperationInput, OpError};

use crate::EngineError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Back-off configuration. Delays are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    pub multiplier: f64,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Hard budget for one operation, sleeps included.
    #[serde(rename = "max_elapsed_ms", with = "millis")]
    pub max_elapsed: Duration,
    pub retryable: BTreeSet<ErrorKind>,
}

impl Default for RetryPolicy {
    /// 1s, 2s, 4s ... 32s: the window the function service needs before a
    /// new role can be assumed.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(32),
            max_elapsed: Duration::from_secs(64),
            retryable: BTreeSet::from([ErrorKind::Transient]),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            retryable: BTreeSet::new(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(EngineError::InvalidRetryPolicy(format!(
                "multiplier must be a finite number >= 1, got {}",
                self.multiplier
            )));
        }
        if self.initial_delay.is_zero() {
            return Err(EngineError::InvalidRetryPolicy(
                "initial delay must be greater than zero".into(),
            ));
        }
        if self.max_elapsed.is_zero() {
            return Err(EngineError::InvalidRetryPolicy(
                "max elapsed time must be greater than zero".into(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(EngineError::InvalidRetryPolicy(format!(
                "max delay {:?} is below initial delay {:?}",
                self.max_delay, self.initial_delay
            )));
        }
        Ok(())
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Delay before the `retry`-th retry (1-based):
    /// `min(initial * multiplier^(retry - 1), max_delay)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// BackoffExecutor
// ---------------------------------------------------------------------------

/// How much work one `execute` call took.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub attempts: u32,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl RetryStats {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub(crate) fn merge(self, other: RetryStats) -> RetryStats {
        RetryStats {
            attempts: self.attempts + other.attempts,
            elapsed: self.elapsed + other.elapsed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackoffExecutor {
    policy: RetryPolicy,
}

impl BackoffExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// The caller guarantees `op` is safe to repeat.
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T, OpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OpError>>,
    {
        self.execute_with_stats(name, Idempotency::NaturallyIdempotent, op)
            .await
            .0
    }

    /// Run an [`Operation`], honouring its idempotency class.
    pub async fn execute_operation<T>(
        &self,
        op: &dyn Operation<T>,
        input: &OperationInput,
    ) -> (Result<T, OpError>, RetryStats) {
        debug!(operation = op.name(), latency = ?op.latency_class(), "dispatching");
        self.execute_with_stats(op.name(), op.idempotency(), move || op.call(input))
            .await
    }

    /// Core loop. Operations with [`Idempotency::None`] get exactly one attempt.
    pub async fn execute_with_stats<T, F, Fut>(
        &self,
        name: &str,
        idempotency: Idempotency,
        mut op: F,
    ) -> (Result<T, OpError>, RetryStats)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OpError>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut only_transient = true;

        loop {
            attempts += 1;
            let result = op().await;
            let stats = RetryStats {
                attempts,
                elapsed: started.elapsed(),
            };

            let err = match result {
                Ok(value) => {
                    debug!(operation = name, attempt = attempts, "succeeded");
                    return (Ok(value), stats);
                }
                Err(err) => err,
            };

            let retryable =
                idempotency != Idempotency::None && self.policy.is_retryable(err.kind());
            if !retryable {
                debug!(operation = name, attempt = attempts, error = %err, "not retryable");
                return (Err(err), stats);
            }

            only_transient &= err.kind() == ErrorKind::Transient;

            let delay = self.policy.delay_for(attempts);
            if stats.elapsed + delay > self.policy.max_elapsed {
                warn!(
                    operation = name,
                    attempts,
                    elapsed = ?stats.elapsed,
                    "retry budget exhausted"
                );
                // A timeout means "never became ready"; anything else keeps
                // its own classification.
                if !only_transient {
                    return (Err(err), stats);
                }
                let timeout = OpError::Timeout {
                    operation: name.to_owned(),
                    attempts,
                    elapsed: stats.elapsed,
                    last_error: err.to_string(),
                };
                return (Err(timeout), stats);
            }

            warn!(
                operation = name,
                attempt = attempts,
                delay = ?delay,
                error = %err,
                "retryable failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlplane::mock::{MockBehaviour, MockOperation};

    fn policy(initial_ms: u64, multiplier: f64, max_delay_ms: u64, max_elapsed_ms: u64) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(initial_ms),
            multiplier,
            max_delay: Duration::from_millis(max_delay_ms),
            max_elapsed: Duration::from_millis(max_elapsed_ms),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn delay_grows_geometrically_and_caps() {
        let p = policy(100, 2.0, 1_000, 60_000);
        let delays: Vec<u64> = (1..=6).map(|n| p.delay_for(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);

        let p = policy(10, 3.0, 10_000, 60_000);
        assert_eq!(p.delay_for(1), Duration::from_millis(10));
        assert_eq!(p.delay_for(3), Duration::from_millis(90));
    }

    #[test]
    fn huge_retry_counts_saturate_at_max_delay() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(10_000), p.max_delay);
    }

    #[test]
    fn default_policy_spans_sixty_four_seconds() {
        let p = RetryPolicy::default();
        let total: Duration = (1..=6).map(|n| p.delay_for(n)).sum();
        assert_eq!(total, Duration::from_secs(63));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_policies() {
        assert!(policy(100, 0.5, 1_000, 1_000).validate().is_err());
        assert!(policy(100, f64::NAN, 1_000, 1_000).validate().is_err());
        assert!(policy(100, 2.0, 1_000, 0).validate().is_err());
        assert!(policy(500, 2.0, 100, 1_000).validate().is_err());
        assert!(matches!(
            policy(0, 2.0, 0, 200).validate(),
            Err(EngineError::InvalidRetryPolicy(_))
        ));
        assert!(policy(0, 2.0, 100, 200).validate().is_err());
    }

    #[test]
    fn policy_deserializes_from_millis_with_defaults() {
        let p: RetryPolicy = serde_json::from_str(
            r#"{ "initial_delay_ms": 250, "retryable": ["transient", "not_found"] }"#,
        )
        .unwrap();
        assert_eq!(p.initial_delay, Duration::from_millis(250));
        assert_eq!(p.max_elapsed, Duration::from_secs(64));
        assert!(p.is_retryable(ErrorKind::NotFound));
        assert!(!p.is_retryable(ErrorKind::Fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let exec = BackoffExecutor::new(policy(100, 2.0, 10_000, 60_000));
        let op = MockOperation::failing_then("flaky", ErrorKind::Transient, 3, 42u32);

        let started = Instant::now();
        let (result, stats) = exec.execute_operation(&op, &OperationInput::default()).await;

        assert_eq!(result, Ok(42));
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.retries(), 3);
        // 100 + 200 + 400
        assert_eq!(started.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_fails_fast() {
        let exec = BackoffExecutor::new(policy(100, 2.0, 10_000, 60_000));
        for kind in [ErrorKind::Fatal, ErrorKind::NotFound, ErrorKind::AlreadyExists] {
            let op: MockOperation<u32> = MockOperation::failing("boom", kind);
            let (result, stats) = exec.execute_operation(&op, &OperationInput::default()).await;

            assert_eq!(result.unwrap_err().kind(), kind);
            assert_eq!(stats.attempts, 1);
            assert_eq!(op.call_count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transient_errors_time_out_within_budget() {
        let exec = BackoffExecutor::new(policy(100, 2.0, 10_000, 1_000));
        let op: MockOperation<u32> = MockOperation::failing("never-ready", ErrorKind::Transient);

        let started = Instant::now();
        let (result, stats) = exec.execute_operation(&op, &OperationInput::default()).await;

        // Sleeps of 100 + 200 + 400 fit; the next 800 would overrun 1000.
        match result {
            Err(OpError::Timeout { operation, attempts, .. }) => {
                assert_eq!(operation, "never-ready");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(stats.attempts, 4);
        assert!(started.elapsed() <= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_on_non_transient_error_keeps_its_kind() {
        let mut p = policy(100, 2.0, 10_000, 1_000);
        p.retryable.insert(ErrorKind::NotFound);
        let exec = BackoffExecutor::new(p);
        let op: MockOperation<u32> = MockOperation::failing("lookup", ErrorKind::NotFound);

        let (result, stats) = exec.execute_operation(&op, &OperationInput::default()).await;

        assert_eq!(result, Err(OpError::NotFound("lookup".into())));
        assert_eq!(stats.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_errors_report_the_last_one_when_the_budget_runs_out() {
        let mut p = policy(100, 2.0, 10_000, 1_000);
        p.retryable.insert(ErrorKind::NotFound);
        let exec = BackoffExecutor::new(p);
        let op: MockOperation<u32> = MockOperation::scripted(
            "eventually-visible",
            vec![
                MockBehaviour::Fail(ErrorKind::NotFound),
                MockBehaviour::Fail(ErrorKind::Transient),
            ],
            MockBehaviour::Fail(ErrorKind::Transient),
        );

        let (result, _) = exec.execute_operation(&op, &OperationInput::default()).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_without_idempotency_are_not_retried() {
        let exec = BackoffExecutor::new(policy(100, 2.0, 10_000, 60_000));
        let op = MockOperation::failing_then("send", ErrorKind::Transient, 1, 1u32)
            .with_idempotency(Idempotency::None);

        let (result, _) = exec.execute_operation(&op, &OperationInput::default()).await;
        assert!(matches!(result, Err(OpError::Transient(_))));
        assert_eq!(op.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closures_can_be_executed_directly() {
        let exec = BackoffExecutor::new(policy(10, 2.0, 100, 1_000));
        let mut calls = 0;
        let result = exec
            .execute("counter", || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        Err(OpError::Transient("not yet".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }
}
