//! Tag-group prompt execution engine.
//!
//! A tag group is a named, ordered set of prompt templates (`mainReference-001`,
//! `mainReference-002`, ...). This crate sequences those templates as steps of a
//! single execution, carries variables from completed steps into later ones, and
//! persists the execution so a run can be resumed. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (resolution, carry-over, the execution
//!   state machine, progress and summaries). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (execution store, config, template files,
//!   process execution, exports). Isolated to enable mocking in tests.
//!
//! The [`driver`] module coordinates core logic with an injected
//! [`io::executor::StepExecutor`] to run steps; the binary wraps it in a CLI.

pub mod core;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod template;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
