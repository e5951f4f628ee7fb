//! Test-only helpers for templates, inputs, and scripted executors.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::core::types::{ExecutionResult, Inputs};
use crate::io::config::{Config, write_config};
use crate::io::executor::{StepExecutor, StepRequest};
use crate::io::init::WorkspacePaths;
use crate::io::templates::{TemplateFile, write_template_file};
use crate::template::{PromptTemplate, VariableDefinition, VariableType};

/// Create a deterministic template with no declared variables.
pub fn template(id: &str, group_tag: &str, text: &str) -> PromptTemplate {
    PromptTemplate {
        id: id.to_string(),
        name: format!("{} name", id),
        group_tag: group_tag.to_string(),
        template_text: text.to_string(),
        variables: Vec::new(),
        model: "test-model".to_string(),
    }
}

/// Create a template declaring optional text variables `names`.
pub fn template_with_vars(id: &str, group_tag: &str, text: &str, names: &[&str]) -> PromptTemplate {
    PromptTemplate {
        variables: names
            .iter()
            .map(|name| VariableDefinition {
                name: name.to_string(),
                kind: VariableType::Text,
                required: false,
                options: None,
                default_value: None,
            })
            .collect(),
        ..template(id, group_tag, text)
    }
}

/// Build string inputs from pairs.
pub fn inputs(pairs: &[(&str, &str)]) -> Inputs {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect()
}

/// A completed result with the given raw output and a 5ms duration.
pub fn completed(raw_output: &str) -> ExecutionResult {
    ExecutionResult::completed("prompt", raw_output, 5)
}

/// One scripted executor response.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Executor returns a completed result with this output.
    Output(String),
    /// Executor returns a failed result with this error.
    Failed(String),
    /// Executor itself errors (e.g. process could not be spawned).
    Error(String),
}

/// Executor that replays queued responses and records every request.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: RefCell<VecDeque<ScriptedResponse>>,
    requests: RefCell<Vec<StepRequest>>,
}

impl ScriptedExecutor {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn outputs(outputs: &[&str]) -> Self {
        Self::new(
            outputs
                .iter()
                .map(|output| ScriptedResponse::Output(output.to_string()))
                .collect(),
        )
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.borrow().clone()
    }
}

impl StepExecutor for ScriptedExecutor {
    fn execute(&self, request: &StepRequest) -> Result<ExecutionResult> {
        self.requests.borrow_mut().push(request.clone());
        let response = self
            .responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted executor exhausted"))?;
        match response {
            ScriptedResponse::Output(output) => {
                Ok(ExecutionResult::completed(request.prompt.clone(), output, 7))
            }
            ScriptedResponse::Failed(error) => {
                Ok(ExecutionResult::failed(request.prompt.clone(), error, 7))
            }
            ScriptedResponse::Error(message) => Err(anyhow!(message)),
        }
    }
}

/// Temporary workspace with `.taggroup/` initialized and a template file written.
pub struct TestWorkspace {
    dir: tempfile::TempDir,
    pub paths: WorkspacePaths,
}

impl TestWorkspace {
    pub fn new(templates: Vec<PromptTemplate>) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = WorkspacePaths::new(dir.path());
        let config = Config::default();
        write_config(&paths.config_path, &config)?;
        write_template_file(&paths.root.join(&config.templates_path), &TemplateFile { templates })?;
        Ok(Self { dir, paths })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
