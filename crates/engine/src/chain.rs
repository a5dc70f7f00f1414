//! Chain validation: run this before binding a plan or when checking a
//! workflow ahead of time.
//!
//! Rules enforced:
//! 1. The chain has at least one step.
//! 2. Step names are unique.
//! 3. Every dependency names an existing step.
//! 4. Every dependency runs strictly before the step that reads it.
//!
//! Returns the step names in execution order on success.

use std::collections::{HashMap, HashSet};

use crate::{EngineError, Workflow};

/// Validate the workflow's chain and return its execution order.
///
/// # Errors
/// - [`EngineError::EmptyWorkflow`] if there are no steps.
/// - [`EngineError::DuplicateStepName`] if two steps share a name.
/// - [`EngineError::UnknownStepReference`] if a dependency names no step.
/// - [`EngineError::ForwardReference`] if a dependency does not run earlier.
pub fn validate_chain(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    check_chain(
        &workflow.name,
        workflow
            .steps
            .iter()
            .map(|s| (s.name.as_str(), s.depends_on.as_slice())),
    )
}

/// Only the uniqueness rule; the runner needs nothing stronger to resolve
/// dependencies by name.
pub(crate) fn check_unique_names(workflow: &Workflow) -> Result<(), EngineError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(EngineError::DuplicateStepName(step.name.clone()));
        }
    }
    Ok(())
}

pub(crate) fn check_chain<'a, I>(workflow: &str, steps: I) -> Result<Vec<String>, EngineError>
where
    I: IntoIterator<Item = (&'a str, &'a [String])> + Clone,
{
    // Position of each step in the chain.
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (index, (name, _)) in steps.clone().into_iter().enumerate() {
        if positions.insert(name, index).is_some() {
            return Err(EngineError::DuplicateStepName(name.to_owned()));
        }
    }

    if positions.is_empty() {
        return Err(EngineError::EmptyWorkflow(workflow.to_owned()));
    }

    let mut order = Vec::with_capacity(positions.len());
    for (index, (name, depends_on)) in steps.into_iter().enumerate() {
        for dependency in depends_on {
            match positions.get(dependency.as_str()) {
                None => {
                    return Err(EngineError::UnknownStepReference {
                        step: name.to_owned(),
                        dependency: dependency.clone(),
                    })
                }
                Some(&at) if at >= index => {
                    return Err(EngineError::ForwardReference {
                        step: name.to_owned(),
                        dependency: dependency.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        order.push(name.to_owned());
    }

    Ok(order)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkflowStep;
    use controlplane::mock::MockOperation;
    use controlplane::ResourceKind;

    fn step(name: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep::create(name, MockOperation::creating(name, ResourceKind::Role, name))
            .depends_on(deps.iter().copied())
    }

    fn chain(steps: Vec<WorkflowStep>) -> Workflow {
        steps.into_iter().fold(Workflow::new("test"), Workflow::step)
    }

    #[test]
    fn valid_chain_returns_declared_order() {
        // role → function → rule
        let wf = chain(vec![
            step("role", &[]),
            step("function", &["role"]),
            step("rule", &["function"]),
        ]);
        assert_eq!(validate_chain(&wf).unwrap(), vec!["role", "function", "rule"]);
    }

    #[test]
    fn dependency_may_skip_over_steps() {
        let wf = chain(vec![
            step("role", &[]),
            step("function", &["role"]),
            step("rule", &[]),
            step("permission", &["function", "rule"]),
        ]);
        assert_eq!(validate_chain(&wf).unwrap().len(), 4);
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert!(matches!(
            validate_chain(&Workflow::new("nothing")),
            Err(EngineError::EmptyWorkflow(name)) if name == "nothing"
        ));
    }

    #[test]
    fn duplicate_step_name_is_rejected() {
        let wf = chain(vec![step("role", &[]), step("role", &[])]);
        assert!(matches!(
            validate_chain(&wf),
            Err(EngineError::DuplicateStepName(name)) if name == "role"
        ));
        assert!(check_unique_names(&wf).is_err());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let wf = chain(vec![step("function", &["ghost"])]);
        assert!(matches!(
            validate_chain(&wf),
            Err(EngineError::UnknownStepReference { dependency, .. }) if dependency == "ghost"
        ));
    }

    #[test]
    fn forward_and_self_references_are_rejected() {
        let wf = chain(vec![step("function", &["role"]), step("role", &[])]);
        assert!(matches!(
            validate_chain(&wf),
            Err(EngineError::ForwardReference { step, .. }) if step == "function"
        ));

        let wf = chain(vec![step("loop", &["loop"])]);
        assert!(matches!(validate_chain(&wf), Err(EngineError::ForwardReference { .. })));
    }
}
