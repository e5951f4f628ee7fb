//! Shared deterministic types for the execution engine.
//!
//! These types are the persisted shape of an execution. Field order and map types
//! are chosen so serialized output is stable across saves.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Variable name -> value for a single step.
pub type Inputs = BTreeMap<String, Value>;

/// Lifecycle state of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl StepStatus {
    /// Completed or skipped: the step no longer blocks aggregate completion.
    pub fn is_done(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        }
    }
}

/// Aggregate state of an execution, derived from its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
        }
    }
}

/// Outcome reported by a step executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Completed,
    Failed,
}

/// Captured result of running one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ResultStatus,
    /// Prompt text sent to the model after placeholder resolution.
    pub resolved_prompt: String,
    /// Model output as returned by the backend (may be empty).
    pub raw_output: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    pub fn completed(
        resolved_prompt: impl Into<String>,
        raw_output: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            status: ResultStatus::Completed,
            resolved_prompt: resolved_prompt.into(),
            raw_output: raw_output.into(),
            error: None,
            execution_time_ms,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn failed(
        resolved_prompt: impl Into<String>,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            status: ResultStatus::Failed,
            resolved_prompt: resolved_prompt.into(),
            raw_output: String::new(),
            error: Some(error.into()),
            execution_time_ms,
            started_at: None,
            completed_at: None,
        }
    }
}

/// One template instance within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub template_id: String,
    /// Denormalized for display; the template itself is resolved by id.
    pub template_name: String,
    pub status: StepStatus,
    pub inputs: Inputs,
    pub notes: String,
    pub execution: Option<ExecutionResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate root for one run of a tag group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagGroupExecution {
    pub id: String,
    pub group_name: String,
    pub project_id: Option<String>,
    pub steps: Vec<Step>,
    pub current_step_index: usize,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Counts over an execution's steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total_steps: usize,
    /// 1-based position of the cursor (0 when there are no steps).
    pub current_step: usize,
    pub completed_steps: usize,
    pub skipped_steps: usize,
    pub failed_steps: usize,
}

impl Progress {
    /// Steps that reached a terminal state.
    pub fn finished_steps(&self) -> usize {
        self.completed_steps + self.skipped_steps + self.failed_steps
    }

    /// Share of steps that are completed or skipped, in whole percent.
    pub fn percent_done(&self) -> u32 {
        if self.total_steps == 0 {
            return 0;
        }
        let done = (self.completed_steps + self.skipped_steps) as f64;
        (done / self.total_steps as f64 * 100.0).round() as u32
    }
}
