//! `engine` crate: the provisioning core: retry with back-off,
//! create-or-adopt conflict resolution, and the dependency-ordered
//! workflow runner with its mirrored teardown.

pub mod adopt;
pub mod backoff;
pub mod blueprints;
pub mod chain;
pub mod error;
pub mod models;
pub mod plan;
pub mod runner;

pub use adopt::create_or_adopt;
pub use backoff::{BackoffExecutor, RetryPolicy, RetryStats};
pub use chain::validate_chain;
pub use error::EngineError;
pub use models::{
    CompletedStep, StepAction, StepFailure, TeardownEntry, TeardownOutcome, TeardownReport,
    Workflow, WorkflowResult, WorkflowStatus, WorkflowStep,
};
pub use plan::{PlanStep, WorkflowPlan};
pub use runner::{RunnerConfig, WorkflowRunner};
