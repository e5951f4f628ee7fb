//! Tag-group execution state machine.
//!
//! All transitions act on the step under the cursor. Navigation never fails: out
//! of range moves return `false` and leave the execution unchanged. The machine
//! does not call any backend; callers run the resolved prompt and report the
//! outcome through `mark_*`.

use chrono::Utc;

use crate::core::carry_over::{CarryOver, CarryOverExtractor, KeyValueExtractor};
use crate::core::error::EngineError;
use crate::core::progress::calculate_progress;
use crate::core::resolver::{defaults_for, is_set, resolve};
use crate::core::types::{
    ExecutionResult, ExecutionStatus, Inputs, Progress, Step, StepStatus, TagGroupExecution,
};
use crate::template::PromptTemplate;

/// Build an execution for every template whose group tag starts with `group_name`.
///
/// Templates are ordered by the numeric suffix of their tag. The sort is stable,
/// so templates sharing a suffix keep their input order.
pub fn create_execution(
    id: impl Into<String>,
    group_name: &str,
    templates: &[PromptTemplate],
    project_id: Option<String>,
) -> Result<TagGroupExecution, EngineError> {
    let mut members: Vec<&PromptTemplate> = templates
        .iter()
        .filter(|template| template.group_tag.starts_with(group_name))
        .collect();
    if members.is_empty() {
        return Err(EngineError::EmptyGroup {
            group: group_name.to_string(),
        });
    }
    members.sort_by_key(|template| template.group_order());

    let id = id.into();
    let steps = members
        .iter()
        .enumerate()
        .map(|(index, template)| Step {
            id: format!("{}-step-{}", id, index + 1),
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            status: StepStatus::Pending,
            inputs: defaults_for(template),
            notes: String::new(),
            execution: None,
            started_at: None,
            completed_at: None,
        })
        .collect();

    Ok(TagGroupExecution {
        id,
        group_name: group_name.to_string(),
        project_id,
        steps,
        current_step_index: 0,
        status: ExecutionStatus::Pending,
        started_at: None,
        completed_at: None,
    })
}

impl TagGroupExecution {
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    fn current_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.current_step_index)
    }

    pub fn can_advance(&self) -> bool {
        self.current_step_index + 1 < self.steps.len()
    }

    pub fn can_retreat(&self) -> bool {
        self.current_step_index > 0
    }

    /// Move the cursor forward by one. The current step need not be finished.
    pub fn advance(&mut self) -> bool {
        if !self.can_advance() {
            return false;
        }
        self.current_step_index += 1;
        true
    }

    pub fn retreat(&mut self) -> bool {
        if !self.can_retreat() {
            return false;
        }
        self.current_step_index -= 1;
        true
    }

    /// Set the cursor directly. Which steps a user may jump to is caller policy.
    pub fn jump_to_step(&mut self, index: usize) -> bool {
        if index >= self.steps.len() {
            return false;
        }
        self.current_step_index = index;
        true
    }

    /// Replace the current step's inputs wholesale.
    pub fn update_inputs(&mut self, inputs: Inputs) {
        if let Some(step) = self.current_step_mut() {
            step.inputs = inputs;
        }
    }

    pub fn update_notes(&mut self, notes: impl Into<String>) {
        if let Some(step) = self.current_step_mut() {
            step.notes = notes.into();
        }
    }

    /// Put the current step into `running`.
    ///
    /// Rejected while any step is running, so one execution never has two
    /// prompts in flight. A failed step may be run again directly.
    pub fn begin_step(&mut self) -> Result<(), EngineError> {
        if let Some(index) = self
            .steps
            .iter()
            .position(|step| step.status == StepStatus::Running)
        {
            return Err(EngineError::StepAlreadyRunning { index });
        }
        let index = self.current_step_index;
        let now = Utc::now();
        let Some(step) = self.steps.get_mut(index) else {
            return Err(EngineError::EmptyGroup {
                group: self.group_name.clone(),
            });
        };
        if step.status.is_done() {
            return Err(EngineError::StepNotRunnable {
                index,
                status: step.status,
            });
        }
        step.status = StepStatus::Running;
        step.started_at = Some(now);
        step.completed_at = None;
        self.status = ExecutionStatus::Running;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    /// Return the running current step to `pending` after its call was abandoned.
    pub fn cancel_running_step(&mut self) -> Result<(), EngineError> {
        match self.current_step_mut() {
            Some(step) if step.status == StepStatus::Running => {
                step.status = StepStatus::Pending;
                step.started_at = None;
            }
            _ => return Err(EngineError::NoRunningStep),
        }
        self.recompute_status();
        Ok(())
    }

    pub fn mark_completed(&mut self, result: ExecutionResult) {
        let now = Utc::now();
        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Completed;
            step.execution = Some(result);
            step.completed_at = Some(now);
        }
        self.recompute_status();
    }

    pub fn mark_skipped(&mut self) {
        let now = Utc::now();
        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Skipped;
            step.completed_at = Some(now);
        }
        self.recompute_status();
    }

    /// Fail the current step, appending `message` to its notes.
    pub fn mark_failed(&mut self, message: &str) {
        let now = Utc::now();
        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Failed;
            append_error_note(&mut step.notes, message);
            step.completed_at = Some(now);
        }
        self.recompute_status();
    }

    /// Fail the current step from an executor result, keeping the result for display.
    pub fn mark_failed_with_result(&mut self, result: ExecutionResult) {
        let message = result
            .error
            .clone()
            .filter(|err| !err.trim().is_empty())
            .unwrap_or_else(|| "execution failed".to_string());
        self.mark_failed(&message);
        if let Some(step) = self.current_step_mut() {
            step.execution = Some(result);
        }
    }

    /// Reset a failed current step to `pending` so it can run again.
    ///
    /// Notes are kept so the earlier error stays visible.
    pub fn retry_step(&mut self) -> bool {
        match self.current_step_mut() {
            Some(step) if step.status == StepStatus::Failed => {
                step.status = StepStatus::Pending;
                step.execution = None;
                step.started_at = None;
                step.completed_at = None;
            }
            _ => return false,
        }
        self.recompute_status();
        true
    }

    pub fn pause(&mut self) -> bool {
        if self.status == ExecutionStatus::Completed
            || self.status == ExecutionStatus::Paused
            || self.has_running_step()
        {
            return false;
        }
        self.status = ExecutionStatus::Paused;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.status != ExecutionStatus::Paused {
            return false;
        }
        self.status = if self.started_at.is_some() {
            ExecutionStatus::Running
        } else {
            ExecutionStatus::Pending
        };
        true
    }

    pub fn has_running_step(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status == StepStatus::Running)
    }

    /// A failed step keeps the execution from completing until retried or skipped.
    pub fn is_blocked(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status == StepStatus::Failed)
    }

    pub fn is_complete(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn progress(&self) -> Progress {
        calculate_progress(self)
    }

    /// Variables extracted from every completed step, later steps winning.
    pub fn available_variables(&self) -> CarryOver {
        self.available_variables_with(&KeyValueExtractor)
    }

    pub fn available_variables_with(&self, extractor: &dyn CarryOverExtractor) -> CarryOver {
        let mut vars = CarryOver::new();
        for step in &self.steps {
            if step.status != StepStatus::Completed {
                continue;
            }
            if let Some(result) = &step.execution {
                vars.extend(extractor.extract(&result.raw_output));
            }
        }
        vars
    }

    /// Fill unset inputs of the current step from carried-over variables.
    ///
    /// Only names declared by `template` are considered and explicit values are
    /// never overwritten. Returns the names that were filled.
    pub fn apply_carry_over(&mut self, template: &PromptTemplate) -> Vec<String> {
        self.apply_carry_over_with(template, &KeyValueExtractor)
    }

    pub fn apply_carry_over_with(
        &mut self,
        template: &PromptTemplate,
        extractor: &dyn CarryOverExtractor,
    ) -> Vec<String> {
        let available = self.available_variables_with(extractor);
        let Some(step) = self.current_step_mut() else {
            return Vec::new();
        };
        let mut applied = Vec::new();
        for var in &template.variables {
            if is_set(&step.inputs, &var.name) {
                continue;
            }
            if let Some(value) = available.get(&var.name) {
                step.inputs
                    .insert(var.name.clone(), serde_json::Value::String(value.clone()));
                applied.push(var.name.clone());
            }
        }
        applied
    }

    /// Preview of the current step's prompt with its present inputs.
    pub fn resolved_prompt(&self, template: &PromptTemplate) -> Option<String> {
        self.current_step()
            .map(|step| resolve(&template.template_text, &step.inputs))
    }

    fn recompute_status(&mut self) {
        if !self.steps.is_empty() && self.steps.iter().all(|step| step.status.is_done()) {
            self.status = ExecutionStatus::Completed;
            self.completed_at.get_or_insert_with(Utc::now);
            return;
        }
        self.completed_at = None;
        if self.status == ExecutionStatus::Paused && !self.has_running_step() {
            return;
        }
        self.status = if self.started_at.is_some() || self.has_running_step() {
            ExecutionStatus::Running
        } else {
            ExecutionStatus::Pending
        };
    }
}

fn append_error_note(notes: &mut String, message: &str) {
    if !notes.trim().is_empty() {
        notes.push_str("\n\n");
    }
    notes.push_str("Error: ");
    notes.push_str(message.trim());
}
