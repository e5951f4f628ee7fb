//! Caller-facing summary of an execution, the basis for exports.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::{ExecutionStatus, Inputs, StepStatus, TagGroupExecution};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub position: usize,
    pub name: String,
    pub status: StepStatus,
    pub inputs: Inputs,
    pub output: Option<String>,
    pub notes: String,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStatistics {
    pub total_steps: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `completed / total_steps * 100`, rounded to one decimal place.
    pub success_rate: f64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub group_name: String,
    pub project_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepSummary>,
    pub statistics: SummaryStatistics,
}

impl ExecutionSummary {
    pub fn from_execution(execution: &TagGroupExecution) -> Self {
        let steps: Vec<StepSummary> = execution
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepSummary {
                position: index + 1,
                name: step.template_name.clone(),
                status: step.status,
                inputs: step.inputs.clone(),
                output: step
                    .execution
                    .as_ref()
                    .map(|result| result.raw_output.clone())
                    .filter(|output| !output.is_empty()),
                notes: step.notes.clone(),
                duration_ms: step.execution.as_ref().map(|result| result.execution_time_ms),
            })
            .collect();

        let progress = execution.progress();
        let statistics = SummaryStatistics {
            total_steps: progress.total_steps,
            completed: progress.completed_steps,
            skipped: progress.skipped_steps,
            failed: progress.failed_steps,
            success_rate: success_rate(progress.completed_steps, progress.total_steps),
            total_duration_ms: steps.iter().filter_map(|step| step.duration_ms).sum(),
        };

        Self {
            execution_id: execution.id.clone(),
            group_name: execution.group_name.clone(),
            project_id: execution.project_id.clone(),
            status: execution.status,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            steps,
            statistics,
        }
    }
}

/// Percentage of completed steps, rounded to one decimal place.
pub fn success_rate(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let rate = completed as f64 / total as f64 * 100.0;
    (rate * 10.0).round() / 10.0
}
