//! Step executor abstraction.
//!
//! The [`StepExecutor`] trait decouples the driver from the model backend. The
//! shipped backend pipes the resolved prompt into a configurable command (any
//! CLI that reads a prompt on stdin and prints the answer). Tests use scripted
//! executors that return predetermined results without spawning processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{ExecutionResult, Inputs};
use crate::io::config::ExecutorConfig;
use crate::io::process::run_command_with_timeout;

/// Environment variable carrying the step's model identifier.
pub const MODEL_ENV: &str = "TAGGROUP_MODEL";
/// Environment variable carrying the step's template id.
pub const TEMPLATE_ID_ENV: &str = "TAGGROUP_TEMPLATE_ID";

/// Parameters for one step execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRequest {
    pub template_id: String,
    pub model: String,
    /// Fully resolved prompt text.
    pub prompt: String,
    pub inputs: Inputs,
}

/// Abstraction over model backends.
pub trait StepExecutor {
    /// Run one prompt.
    ///
    /// A backend that produced an answer returns `Ok` with a completed or failed
    /// result. `Err` means the backend could not be driven at all (spawn failure,
    /// timeout, non-zero exit); the driver records that as a failed step too.
    fn execute(&self, request: &StepRequest) -> Result<ExecutionResult>;
}

/// Executor that spawns the configured command once per step.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandExecutor {
    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("executor.command must be a non-empty array"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl StepExecutor for CommandExecutor {
    #[instrument(skip_all, fields(template_id = %request.template_id, model = %request.model, program = %self.program))]
    fn execute(&self, request: &StepRequest) -> Result<ExecutionResult> {
        info!(prompt_bytes = request.prompt.len(), "running step command");
        let started_at = Utc::now();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(MODEL_ENV, &request.model)
            .env(TEMPLATE_ID_ENV, &request.template_id);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run step command '{}'", self.program))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "step command timed out");
            return Err(anyhow!(
                "step command timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            warn!(exit_code = ?output.status.code(), "step command failed");
            return Err(if stderr.is_empty() {
                anyhow!("step command exited with status {:?}", output.status.code())
            } else {
                anyhow!(
                    "step command exited with status {:?}: {stderr}",
                    output.status.code()
                )
            });
        }

        let elapsed_ms = u64::try_from(output.elapsed.as_millis()).unwrap_or(u64::MAX);
        debug!(elapsed_ms, stdout_bytes = output.stdout.len(), "step command completed");
        let mut result =
            ExecutionResult::completed(request.prompt.clone(), output.stdout_text(), elapsed_ms);
        result.started_at = Some(started_at);
        result.completed_at = Some(Utc::now());
        Ok(result)
    }
}
