//! Errors raised by the execution state machine.
//!
//! Boundary navigation and missing carry-over values are not errors; these
//! variants cover construction misuse and the running-step guards only.

use thiserror::Error;

use crate::core::types::StepStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("no templates found for group '{group}'")]
    EmptyGroup { group: String },
    #[error("step {index} is already running")]
    StepAlreadyRunning { index: usize },
    #[error("step {index} cannot run from status '{}'", status.as_str())]
    StepNotRunnable { index: usize, status: StepStatus },
    #[error("no step is running")]
    NoRunningStep,
}
