//! Semantic invariants of a stored execution not expressible via serde types.

use std::collections::HashSet;

use crate::core::types::{ExecutionStatus, StepStatus, TagGroupExecution};

/// Check execution invariants:
/// - At least one step, unique step ids
/// - `current_step_index` within `steps`
/// - `status == completed` iff every step is completed or skipped
/// - At most one running step
pub fn validate_invariants(execution: &TagGroupExecution) -> Vec<String> {
    let mut errors = Vec::new();

    if execution.id.trim().is_empty() {
        errors.push("execution id must not be empty".to_string());
    }

    if execution.steps.is_empty() {
        errors.push(format!("{}: execution has no steps", execution.id));
        return errors;
    }

    if execution.current_step_index >= execution.steps.len() {
        errors.push(format!(
            "{}: current_step_index {} out of range for {} steps",
            execution.id,
            execution.current_step_index,
            execution.steps.len()
        ));
    }

    let mut seen = HashSet::new();
    for step in &execution.steps {
        if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }
    }

    let all_done = execution.steps.iter().all(|step| step.status.is_done());
    let completed = execution.status == ExecutionStatus::Completed;
    if all_done != completed {
        errors.push(format!(
            "{}: status '{}' inconsistent with step states",
            execution.id,
            execution.status.as_str()
        ));
    }

    let running = execution
        .steps
        .iter()
        .filter(|step| step.status == StepStatus::Running)
        .count();
    if running > 1 {
        errors.push(format!(
            "{}: {} steps running, at most one allowed",
            execution.id, running
        ));
    }

    errors
}
