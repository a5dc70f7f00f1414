//! Engine-level error types.

use thiserror::Error;

/// Structural problems with a workflow, found before any remote call.
///
/// Step failures during a run are not `EngineError`s; they are reported in
/// [`crate::WorkflowResult`] so the caller can decide whether to tear down.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The workflow has nothing to run.
    #[error("workflow '{0}' has no steps")]
    EmptyWorkflow(String),

    /// Two or more steps share the same name.
    #[error("duplicate step name: '{0}'")]
    DuplicateStepName(String),

    /// A step depends on a name that no step carries.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownStepReference { step: String, dependency: String },

    /// A step depends on itself or on a step that runs after it.
    #[error("step '{step}' depends on '{dependency}', which does not run before it")]
    ForwardReference { step: String, dependency: String },

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("invalid workflow plan: {0}")]
    InvalidPlan(String),

    #[error("cannot parse workflow plan: {0}")]
    PlanParse(#[from] serde_json::Error),
}
