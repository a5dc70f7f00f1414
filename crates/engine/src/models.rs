//! Core domain models for provisioning workflows.
//!
//! A [`Workflow`] is built once per provisioning request, run once by the
//! [`crate::WorkflowRunner`], and discarded. The run's outcome lives in a
//! [`WorkflowResult`], which is all `teardown` needs besides the workflow.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use controlplane::{ErrorKind, OpError, Operation, ResourceDescriptor};

use crate::RetryPolicy;

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// What a step does when it runs forward.
#[derive(Clone)]
pub enum StepAction {
    /// Create a resource; on `AlreadyExists`, adopt it through `lookup` if given.
    Create {
        create: Arc<dyn Operation>,
        lookup: Option<Arc<dyn Operation>>,
    },
    /// A non-creation call (permission grant, target registration).
    Invoke(Arc<dyn Operation>),
}

/// One link in the provisioning chain.
#[derive(Clone)]
pub struct WorkflowStep {
    /// Unique within the workflow; referenced by `depends_on`.
    pub name: String,
    pub action: StepAction,
    /// Steps whose descriptors this step reads.
    pub depends_on: Vec<String>,
    /// Reverses the step's effect; receives the step's descriptor as target.
    pub teardown: Option<Arc<dyn Operation<()>>>,
    /// Overrides the runner's default policy for this step.
    pub policy: Option<RetryPolicy>,
}

impl WorkflowStep {
    fn with_action(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            depends_on: Vec::new(),
            teardown: None,
            policy: None,
        }
    }

    /// A creation step that fails on a name conflict.
    pub fn create(name: impl Into<String>, create: impl Operation + 'static) -> Self {
        Self::with_action(
            name,
            StepAction::Create {
                create: Arc::new(create),
                lookup: None,
            },
        )
    }

    /// A creation step that adopts the existing resource on a name conflict.
    pub fn create_or_adopt(
        name: impl Into<String>,
        create: impl Operation + 'static,
        lookup: impl Operation + 'static,
    ) -> Self {
        Self::with_action(
            name,
            StepAction::Create {
                create: Arc::new(create),
                lookup: Some(Arc::new(lookup)),
            },
        )
    }

    pub fn invoke(name: impl Into<String>, op: impl Operation + 'static) -> Self {
        Self::with_action(name, StepAction::Invoke(Arc::new(op)))
    }

    pub fn depends_on<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn with_teardown(mut self, op: impl Operation<()> + 'static) -> Self {
        self.teardown = Some(Arc::new(op));
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn is_creation(&self) -> bool {
        matches!(self.action, StepAction::Create { .. })
    }
}

impl fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match &self.action {
            StepAction::Create { create, lookup } => format!(
                "create({}{})",
                create.name(),
                lookup
                    .as_ref()
                    .map(|l| format!(", adopt via {}", l.name()))
                    .unwrap_or_default()
            ),
            StepAction::Invoke(op) => format!("invoke({})", op.name()),
        };
        f.debug_struct("WorkflowStep")
            .field("name", &self.name)
            .field("action", &action)
            .field("depends_on", &self.depends_on)
            .field("teardown", &self.teardown.as_ref().map(|t| t.name().to_owned()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// An ordered chain of steps.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step (builder style).
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn position(&self, step: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == step)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Every step succeeded.
    Completed,
    /// Forward execution stopped at `WorkflowResult::failure`.
    Failed,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed    => write!(f, "failed"),
        }
    }
}

/// A step that ran to success.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedStep {
    pub index: usize,
    pub name: String,
    pub descriptor: ResourceDescriptor,
    /// Remote calls made for this step, retries and adoption lookup included.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The step that stopped the run, and why.
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    pub index: usize,
    pub name: String,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    #[serde(skip)]
    pub error: OpError,
}

impl StepFailure {
    pub(crate) fn new(index: usize, name: &str, error: OpError, attempts: u32) -> Self {
        Self {
            index,
            name: name.to_owned(),
            kind: error.kind(),
            message: error.to_string(),
            attempts,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    /// Correlates log lines of one run.
    pub run_id: Uuid,
    pub workflow: String,
    pub status: WorkflowStatus,
    /// Steps that succeeded, in execution order.
    pub completed: Vec<CompletedStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
}

impl WorkflowResult {
    pub fn is_completed(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    pub fn failed_step(&self) -> Option<usize> {
        self.failure.as_ref().map(|f| f.index)
    }

    pub fn error(&self) -> Option<&OpError> {
        self.failure.as_ref().map(|f| &f.error)
    }

    /// Descriptor produced by the named step, if it completed.
    pub fn descriptor(&self, step: &str) -> Option<&ResourceDescriptor> {
        self.completed
            .iter()
            .find(|c| c.name == step)
            .map(|c| &c.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.completed.iter().map(|c| &c.descriptor)
    }
}

// ---------------------------------------------------------------------------
// Teardown report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TeardownOutcome {
    Removed,
    /// The delete reported `NotFound`; nothing left to remove.
    AlreadyAbsent,
    /// The step has no teardown operation.
    Skipped,
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TeardownEntry {
    pub index: usize,
    pub name: String,
    #[serde(flatten)]
    pub outcome: TeardownOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    pub run_id: Uuid,
    /// In the order teardown visited them: reverse execution order.
    pub entries: Vec<TeardownEntry>,
}

impl TeardownReport {
    /// True when no teardown operation failed.
    pub fn is_clean(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|e| matches!(e.outcome, TeardownOutcome::Failed { .. }))
    }

    pub fn failures(&self) -> impl Iterator<Item = &TeardownEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, TeardownOutcome::Failed { .. }))
    }
}
