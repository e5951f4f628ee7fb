//! Caller loop that runs steps through a [`StepExecutor`].
//!
//! The state machine never performs I/O; this module is the one place where a
//! step's prompt is resolved, handed to the executor, and the result folded back
//! into the execution. Persisting the execution is left to the caller.

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::resolver::{missing_required, resolve};
use crate::core::types::{ResultStatus, StepStatus, TagGroupExecution};
use crate::io::executor::{StepExecutor, StepRequest};
use crate::io::templates::TemplateSet;

/// Options for running steps.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Move the cursor to the next step after a step completes.
    pub auto_advance: bool,
    /// Model used when a template's `model` is empty.
    pub default_model: String,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            auto_advance: true,
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}

/// The current step declares required variables that have no value.
///
/// The step is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step {} is missing required inputs: {}", .index + 1, .names.join(", "))]
pub struct MissingInputsError {
    pub index: usize,
    pub names: Vec<String>,
}

/// Result of running one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Zero-based index of the step that ran.
    pub index: usize,
    pub template_id: String,
    /// Completed or failed.
    pub status: StepStatus,
    /// Error text when the step failed.
    pub error: Option<String>,
    /// Whether the cursor moved to the next step.
    pub advanced: bool,
    /// Inputs filled on the newly current step from carried-over variables.
    pub carried_over: Vec<String>,
}

/// Reason why [`run_until_blocked`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Every step is completed or skipped.
    Complete,
    /// A step failed during this run.
    Failed { index: usize, error: String },
    /// A pending step needs required inputs before it can run.
    MissingInputs { index: usize, names: Vec<String> },
    /// No pending step remains at or after the cursor.
    NoPendingAhead,
}

/// Summary of a [`run_until_blocked`] invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub steps_executed: u32,
    pub stop: RunStop,
}

/// Fill the current pending step's unset inputs from carried-over variables.
///
/// Call after every cursor move. Returns the names that were filled.
pub fn enter_step(execution: &mut TagGroupExecution, templates: &TemplateSet) -> Result<Vec<String>> {
    let Some(step) = execution.current_step() else {
        return Ok(Vec::new());
    };
    if step.status != StepStatus::Pending {
        return Ok(Vec::new());
    }
    let template = templates.require(&step.template_id)?;
    let applied = execution.apply_carry_over(template);
    if !applied.is_empty() {
        debug!(index = execution.current_step_index, applied = ?applied, "applied carry-over");
    }
    Ok(applied)
}

/// Run the current step once.
///
/// Fails without touching the step when required inputs are missing (as a
/// [`MissingInputsError`]) or the step cannot start. Executor errors are not
/// returned: they are recorded on the step as a failure.
#[instrument(skip_all, fields(execution_id = %execution.id, index = execution.current_step_index))]
pub fn run_current_step<E: StepExecutor + ?Sized>(
    execution: &mut TagGroupExecution,
    templates: &TemplateSet,
    executor: &E,
    options: &DriverOptions,
) -> Result<StepOutcome> {
    let index = execution.current_step_index;
    let step = execution
        .current_step()
        .ok_or_else(|| anyhow!("execution {} has no steps", execution.id))?;
    let template = templates.require(&step.template_id)?;
    let template_id = template.id.clone();

    if matches!(step.status, StepStatus::Pending | StepStatus::Failed) {
        execution.apply_carry_over(template);
    }
    let inputs = execution
        .current_step()
        .map(|step| step.inputs.clone())
        .unwrap_or_default();
    let missing = missing_required(template, &inputs);
    if !missing.is_empty() {
        return Err(MissingInputsError {
            index,
            names: missing,
        }
        .into());
    }

    execution
        .begin_step()
        .with_context(|| format!("start step {}", index + 1))?;

    let request = StepRequest {
        template_id: template_id.clone(),
        model: if template.model.trim().is_empty() {
            options.default_model.clone()
        } else {
            template.model.clone()
        },
        prompt: resolve(&template.template_text, &inputs),
        inputs,
    };
    info!(template_id = %request.template_id, model = %request.model, "executing step");

    let error = match executor.execute(&request) {
        Ok(result) if result.status == ResultStatus::Completed => {
            execution.mark_completed(result);
            None
        }
        Ok(result) => {
            let error = result.error.clone().unwrap_or_default();
            warn!(error = %error, "step returned a failed result");
            execution.mark_failed_with_result(result);
            Some(error)
        }
        Err(err) => {
            let error = format!("{err:#}");
            warn!(error = %error, "step executor errored");
            execution.mark_failed(&error);
            Some(error)
        }
    };

    let status = if error.is_none() {
        StepStatus::Completed
    } else {
        StepStatus::Failed
    };
    let mut advanced = false;
    let mut carried_over = Vec::new();
    if status == StepStatus::Completed && options.auto_advance && execution.advance() {
        advanced = true;
        carried_over = enter_step(execution, templates)?;
    }

    Ok(StepOutcome {
        index,
        template_id,
        status,
        error,
        advanced,
        carried_over,
    })
}

/// Run pending steps in order until the execution completes, a step fails, or
/// nothing runnable remains ahead of the cursor.
///
/// `on_step` is called after every executed step (e.g. to persist the
/// execution). Errors other than missing inputs abort the run.
pub fn run_until_blocked<E, F>(
    execution: &mut TagGroupExecution,
    templates: &TemplateSet,
    executor: &E,
    options: &DriverOptions,
    mut on_step: F,
) -> Result<RunOutcome>
where
    E: StepExecutor + ?Sized,
    F: FnMut(&TagGroupExecution, &StepOutcome) -> Result<()>,
{
    let mut steps_executed = 0u32;
    let step_options = DriverOptions {
        auto_advance: true,
        ..options.clone()
    };
    loop {
        if execution.is_complete() {
            return Ok(RunOutcome {
                steps_executed,
                stop: RunStop::Complete,
            });
        }
        let runnable = execution.current_step().is_some_and(|step| {
            matches!(step.status, StepStatus::Pending | StepStatus::Failed)
        });
        if !runnable {
            match next_pending_from(execution, execution.current_step_index + 1) {
                Some(index) => {
                    execution.jump_to_step(index);
                    enter_step(execution, templates)?;
                }
                None => {
                    return Ok(RunOutcome {
                        steps_executed,
                        stop: RunStop::NoPendingAhead,
                    });
                }
            }
        }

        let outcome = match run_current_step(execution, templates, executor, &step_options) {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some(missing) = err.downcast_ref::<MissingInputsError>() {
                    return Ok(RunOutcome {
                        steps_executed,
                        stop: RunStop::MissingInputs {
                            index: missing.index,
                            names: missing.names.clone(),
                        },
                    });
                }
                return Err(err);
            }
        };
        steps_executed += 1;
        on_step(execution, &outcome)?;

        if let Some(error) = outcome.error {
            return Ok(RunOutcome {
                steps_executed,
                stop: RunStop::Failed {
                    index: outcome.index,
                    error,
                },
            });
        }
        if !outcome.advanced && !execution.is_complete() {
            // Completed the last step while earlier ones are still open.
            return Ok(RunOutcome {
                steps_executed,
                stop: RunStop::NoPendingAhead,
            });
        }
    }
}

fn next_pending_from(execution: &TagGroupExecution, start: usize) -> Option<usize> {
    execution
        .steps
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, step)| step.status == StepStatus::Pending)
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution::create_execution;
    use crate::core::types::ExecutionStatus;
    use crate::template::PromptTemplate;
    use crate::test_support::{
        ScriptedExecutor, ScriptedResponse, completed, inputs, template, template_with_vars,
    };

    fn story_templates() -> Vec<PromptTemplate> {
        let mut first = template_with_vars(
            "hero",
            "story-001",
            "Invent a hero for {{premise}}",
            &["premise"],
        );
        first.variables[0].required = true;
        vec![
            first,
            template_with_vars(
                "portrait",
                "story-002",
                "Portrait of {{characterName}}",
                &["characterName"],
            ),
            template("title", "story-003", "Title please"),
        ]
    }

    fn setup() -> (TagGroupExecution, TemplateSet) {
        let templates = story_templates();
        let execution = create_execution("exec-1", "story", &templates, None).expect("execution");
        (execution, TemplateSet::new(templates))
    }

    #[test]
    fn missing_required_inputs_leave_step_untouched() {
        let (mut execution, templates) = setup();
        let executor = ScriptedExecutor::outputs(&["unused"]);
        let before = execution.clone();

        let err = run_current_step(&mut execution, &templates, &executor, &DriverOptions::default())
            .unwrap_err();
        let missing = err.downcast_ref::<MissingInputsError>().expect("typed error");
        assert_eq!(missing.names, vec!["premise"]);
        assert_eq!(execution, before);
        assert!(executor.requests().is_empty());
    }

    #[test]
    fn completed_step_advances_and_carries_over() {
        let (mut execution, templates) = setup();
        execution.update_inputs(inputs(&[("premise", "a heist on Mars")]));
        let executor = ScriptedExecutor::outputs(&["characterName: Sarah\nlook: tall"]);

        let outcome =
            run_current_step(&mut execution, &templates, &executor, &DriverOptions::default())
                .expect("run");

        assert_eq!(outcome.status, StepStatus::Completed);
        assert!(outcome.advanced);
        assert_eq!(outcome.carried_over, vec!["characterName"]);
        assert_eq!(execution.current_step_index, 1);
        assert_eq!(execution.status, ExecutionStatus::Running);

        let requests = executor.requests();
        assert_eq!(requests[0].prompt, "Invent a hero for a heist on Mars");
        assert_eq!(requests[0].model, "test-model");
        assert_eq!(
            execution.steps[1].inputs.get("characterName"),
            Some(&serde_json::Value::String("Sarah".to_string()))
        );
    }

    #[test]
    fn without_auto_advance_cursor_stays() {
        let (mut execution, templates) = setup();
        execution.update_inputs(inputs(&[("premise", "noir")]));
        let executor = ScriptedExecutor::outputs(&["done"]);
        let options = DriverOptions {
            auto_advance: false,
            ..DriverOptions::default()
        };

        let outcome = run_current_step(&mut execution, &templates, &executor, &options).expect("run");
        assert!(!outcome.advanced);
        assert_eq!(execution.current_step_index, 0);
    }

    #[test]
    fn executor_error_becomes_failed_step() {
        let (mut execution, templates) = setup();
        execution.update_inputs(inputs(&[("premise", "noir")]));
        let executor =
            ScriptedExecutor::new(vec![ScriptedResponse::Error("spawn llm".to_string())]);

        let outcome =
            run_current_step(&mut execution, &templates, &executor, &DriverOptions::default())
                .expect("run");

        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("spawn llm"));
        assert!(!outcome.advanced);
        assert_eq!(execution.steps[0].status, StepStatus::Failed);
        assert_eq!(execution.steps[0].notes, "Error: spawn llm");
        assert!(execution.is_blocked());
    }

    #[test]
    fn failed_result_is_kept_on_the_step() {
        let (mut execution, templates) = setup();
        execution.update_inputs(inputs(&[("premise", "noir")]));
        let executor =
            ScriptedExecutor::new(vec![ScriptedResponse::Failed("content filter".to_string())]);

        run_current_step(&mut execution, &templates, &executor, &DriverOptions::default())
            .expect("run");
        let result = execution.steps[0].execution.as_ref().expect("result kept");
        assert_eq!(result.error.as_deref(), Some("content filter"));
        assert_eq!(execution.steps[0].notes, "Error: content filter");
    }

    #[test]
    fn empty_template_model_uses_default() {
        let mut templates = story_templates();
        templates[2].model = String::new();
        let mut execution =
            create_execution("exec-1", "story", &templates, None).expect("execution");
        execution.jump_to_step(2);
        let executor = ScriptedExecutor::outputs(&["A Title"]);
        let options = DriverOptions {
            default_model: "fallback-model".to_string(),
            ..DriverOptions::default()
        };

        run_current_step(&mut execution, &TemplateSet::new(templates), &executor, &options)
            .expect("run");
        assert_eq!(executor.requests()[0].model, "fallback-model");
    }

    #[test]
    fn run_until_blocked_completes_the_group() {
        let (mut execution, templates) = setup();
        execution.update_inputs(inputs(&[("premise", "noir")]));
        let executor = ScriptedExecutor::outputs(&["characterName: Vic", "portrait", "Title"]);
        let mut seen = Vec::new();

        let outcome = run_until_blocked(
            &mut execution,
            &templates,
            &executor,
            &DriverOptions::default(),
            |_, step| {
                seen.push(step.index);
                Ok(())
            },
        )
        .expect("run");

        assert_eq!(outcome.stop, RunStop::Complete);
        assert_eq!(outcome.steps_executed, 3);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(executor.requests()[1].prompt, "Portrait of Vic");
        assert!(execution.is_complete());
        assert!(execution.completed_at.is_some());
    }

    #[test]
    fn run_until_blocked_stops_on_failure() {
        let (mut execution, templates) = setup();
        execution.update_inputs(inputs(&[("premise", "noir")]));
        let executor = ScriptedExecutor::new(vec![
            ScriptedResponse::Output("characterName: Vic".to_string()),
            ScriptedResponse::Failed("rate limited".to_string()),
        ]);

        let outcome = run_until_blocked(
            &mut execution,
            &templates,
            &executor,
            &DriverOptions::default(),
            |_, _| Ok(()),
        )
        .expect("run");

        assert_eq!(
            outcome.stop,
            RunStop::Failed {
                index: 1,
                error: "rate limited".to_string()
            }
        );
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(execution.steps[2].status, StepStatus::Pending);
    }

    #[test]
    fn run_until_blocked_reports_missing_inputs() {
        let (mut execution, templates) = setup();
        let executor = ScriptedExecutor::outputs(&[]);

        let outcome = run_until_blocked(
            &mut execution,
            &templates,
            &executor,
            &DriverOptions::default(),
            |_, _| Ok(()),
        )
        .expect("run");

        assert_eq!(
            outcome.stop,
            RunStop::MissingInputs {
                index: 0,
                names: vec!["premise".to_string()]
            }
        );
        assert_eq!(outcome.steps_executed, 0);
    }

    #[test]
    fn run_until_blocked_skips_over_finished_steps() {
        let (mut execution, templates) = setup();
        execution.mark_completed(completed("characterName: Ada"));
        execution.advance();
        execution.mark_skipped();
        execution.jump_to_step(0);
        let executor = ScriptedExecutor::outputs(&["Title"]);

        let outcome = run_until_blocked(
            &mut execution,
            &templates,
            &executor,
            &DriverOptions::default(),
            |_, _| Ok(()),
        )
        .expect("run");

        assert_eq!(outcome.stop, RunStop::Complete);
        assert_eq!(outcome.steps_executed, 1);
        assert_eq!(executor.requests()[0].template_id, "title");
    }

    #[test]
    fn run_until_blocked_with_nothing_ahead() {
        let (mut execution, templates) = setup();
        execution.jump_to_step(2);
        execution.mark_skipped();
        let executor = ScriptedExecutor::outputs(&[]);

        let outcome = run_until_blocked(
            &mut execution,
            &templates,
            &executor,
            &DriverOptions::default(),
            |_, _| Ok(()),
        )
        .expect("run");
        assert_eq!(outcome.stop, RunStop::NoPendingAhead);
    }

    #[test]
    fn enter_step_only_fills_pending_steps() {
        let (mut execution, templates) = setup();
        execution.mark_completed(completed("characterName: Ada"));
        execution.advance();
        assert_eq!(enter_step(&mut execution, &templates).expect("enter"), vec!["characterName"]);

        execution.mark_skipped();
        execution.update_inputs(Default::default());
        assert!(enter_step(&mut execution, &templates).expect("enter").is_empty());
    }

    #[test]
    fn on_step_error_aborts_the_run() {
        let (mut execution, templates) = setup();
        execution.update_inputs(inputs(&[("premise", "noir")]));
        let executor = ScriptedExecutor::outputs(&["characterName: Vic"]);

        let err = run_until_blocked(
            &mut execution,
            &templates,
            &executor,
            &DriverOptions::default(),
            |_, _| Err(anyhow!("disk full")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }
}
