//! Workflow runner.
//!
//! `WorkflowRunner` is the central orchestrator:
//! 1. Checks that step names are unique.
//! 2. Runs steps strictly in declared order, handing each one the
//!    descriptors of the steps it depends on.
//! 3. Sends creation steps through create-or-adopt and every other step
//!    straight through the back-off executor.
//! 4. Stops at the first failure and reports which step failed and why.
//! 5. On request, tears completed steps down in reverse order, best effort.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use controlplane::{OpError, OperationInput};

use crate::adopt::create_or_adopt_with_stats;
use crate::backoff::{BackoffExecutor, RetryPolicy};
use crate::chain::check_unique_names;
use crate::models::{
    CompletedStep, StepAction, StepFailure, TeardownEntry, TeardownOutcome, TeardownReport,
    WorkflowResult, WorkflowStatus, WorkflowStep,
};
use crate::{EngineError, Workflow};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the runner.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Policy for steps that do not carry their own.
    pub retry: RetryPolicy,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Pending → Running(i) → Completed | Failed(i).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Pending,
    Running(usize),
    Completed,
    Failed(usize),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending    => write!(f, "pending"),
            Self::Running(i) => write!(f, "running step {i}"),
            Self::Completed  => write!(f, "completed"),
            Self::Failed(i)  => write!(f, "failed at step {i}"),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Stateless orchestrator; one runner can serve any number of workflows,
/// concurrently if the caller wishes, since each run owns its own state.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRunner {
    config: RunnerConfig,
}

impl WorkflowRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn executor_for(&self, step: &WorkflowStep) -> BackoffExecutor {
        BackoffExecutor::new(step.policy.clone().unwrap_or_else(|| self.config.retry.clone()))
    }

    fn check(&self, workflow: &Workflow) -> Result<(), EngineError> {
        check_unique_names(workflow)?;
        self.config.retry.validate()?;
        for policy in workflow.steps.iter().filter_map(|s| s.policy.as_ref()) {
            policy.validate()?;
        }
        Ok(())
    }

    /// Run the workflow forward.
    ///
    /// Step failures do not produce `Err`; they end the run with
    /// [`WorkflowStatus::Failed`]. Teardown is never started automatically.
    ///
    /// # Errors
    /// `EngineError` for duplicate step names or an invalid retry policy,
    /// detected before any remote call.
    pub async fn run(&self, workflow: &Workflow) -> Result<WorkflowResult, EngineError> {
        self.check(workflow)?;
        let run_id = Uuid::new_v4();
        Ok(self.run_checked(workflow, run_id).await)
    }

    #[instrument(skip_all, fields(workflow = %workflow.name, run_id = %run_id))]
    async fn run_checked(&self, workflow: &Workflow, run_id: Uuid) -> WorkflowResult {
        let mut state = RunState::Pending;
        info!(steps = workflow.steps.len(), %state, "starting provisioning run");

        let mut completed: Vec<CompletedStep> = Vec::with_capacity(workflow.steps.len());
        let mut failure: Option<StepFailure> = None;

        for (index, step) in workflow.steps.iter().enumerate() {
            state = RunState::Running(index);
            info!(step = %step.name, %state, "step started");

            // ------------------------------------------------------------------
            // Resolve dependencies against steps that already completed.
            // ------------------------------------------------------------------
            let input = match resolve_inputs(step, &completed) {
                Ok(input) => input,
                Err(err) => {
                    error!(step = %step.name, error = %err, "dependency not satisfied");
                    failure = Some(StepFailure::new(index, &step.name, err, 0));
                    state = RunState::Failed(index);
                    break;
                }
            };

            // ------------------------------------------------------------------
            // Execute.
            // ------------------------------------------------------------------
            let executor = self.executor_for(step);
            let started_at = Utc::now();
            let (outcome, stats) = match &step.action {
                StepAction::Create { create, lookup } => {
                    create_or_adopt_with_stats(&executor, create.as_ref(), lookup.as_deref(), &input)
                        .await
                }
                StepAction::Invoke(op) => executor.execute_operation(op.as_ref(), &input).await,
            };

            match outcome {
                Ok(descriptor) => {
                    info!(
                        step = %step.name,
                        id = %descriptor.id,
                        attempts = stats.attempts,
                        retries = stats.retries(),
                        "step succeeded"
                    );
                    completed.push(CompletedStep {
                        index,
                        name: step.name.clone(),
                        descriptor,
                        attempts: stats.attempts,
                        started_at,
                        finished_at: Utc::now(),
                    });
                }
                Err(err) => {
                    error!(
                        step = %step.name,
                        kind = %err.kind(),
                        attempts = stats.attempts,
                        error = %err,
                        "step failed; stopping forward execution"
                    );
                    failure = Some(StepFailure::new(index, &step.name, err, stats.attempts));
                    state = RunState::Failed(index);
                    break;
                }
            }
        }

        let status = match state {
            RunState::Failed(_) => WorkflowStatus::Failed,
            _ => {
                state = RunState::Completed;
                WorkflowStatus::Completed
            }
        };
        info!(%state, completed = completed.len(), "provisioning run finished");

        WorkflowResult {
            run_id,
            workflow: workflow.name.clone(),
            status,
            completed,
            failure,
        }
    }

    /// Undo the completed steps of `result`, newest first.
    ///
    /// Works for completed and failed runs alike. A failing teardown is
    /// logged and recorded, and the remaining steps are still attempted.
    #[instrument(skip_all, fields(workflow = %workflow.name, run_id = %result.run_id))]
    pub async fn teardown(&self, workflow: &Workflow, result: &WorkflowResult) -> TeardownReport {
        info!(steps = result.completed.len(), "starting teardown");

        let mut entries = Vec::with_capacity(result.completed.len());

        for done in result.completed.iter().rev() {
            let outcome = match workflow.steps.get(done.index) {
                Some(step) if step.name == done.name => {
                    self.teardown_step(step, done, &result.completed).await
                }
                _ => {
                    let err = OpError::NotFound(format!(
                        "step '{}' is not part of workflow '{}'",
                        done.name, workflow.name
                    ));
                    warn!(step = %done.name, error = %err, "cannot tear down step");
                    TeardownOutcome::Failed {
                        kind: err.kind(),
                        message: err.to_string(),
                    }
                }
            };

            entries.push(TeardownEntry {
                index: done.index,
                name: done.name.clone(),
                outcome,
            });
        }

        let report = TeardownReport {
            run_id: result.run_id,
            entries,
        };
        if report.is_clean() {
            info!("teardown finished cleanly");
        } else {
            warn!(failed = report.failures().count(), "teardown finished with failures");
        }
        report
    }

    async fn teardown_step(
        &self,
        step: &WorkflowStep,
        done: &CompletedStep,
        completed: &[CompletedStep],
    ) -> TeardownOutcome {
        let Some(op) = &step.teardown else {
            info!(step = %step.name, "no teardown operation; skipping");
            return TeardownOutcome::Skipped;
        };

        let mut input = resolve_inputs(step, completed).unwrap_or_default();
        input.target = Some(done.descriptor.clone());

        let (outcome, _) = self.executor_for(step).execute_operation(op.as_ref(), &input).await;
        match outcome {
            Ok(()) => {
                info!(step = %step.name, id = %done.descriptor.id, "removed");
                TeardownOutcome::Removed
            }
            Err(OpError::NotFound(_)) => {
                info!(step = %step.name, id = %done.descriptor.id, "already absent");
                TeardownOutcome::AlreadyAbsent
            }
            Err(err) => {
                warn!(step = %step.name, error = %err, "teardown failed; continuing");
                TeardownOutcome::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        }
    }
}

/// Collect descriptors of `step`'s dependencies from `completed`.
fn resolve_inputs(step: &WorkflowStep, completed: &[CompletedStep]) -> Result<OperationInput, OpError> {
    let mut dependencies = BTreeMap::new();
    for dependency in &step.depends_on {
        let done = completed
            .iter()
            .find(|c| &c.name == dependency)
            .ok_or_else(|| {
                OpError::NotFound(format!(
                    "step '{}' depends on '{dependency}', which has not completed",
                    step.name
                ))
            })?;
        dependencies.insert(dependency.clone(), done.descriptor.clone());
    }

    Ok(OperationInput {
        dependencies,
        target: None,
    })
}
