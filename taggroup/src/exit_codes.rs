//! Stable exit codes for `taggroup` CLI commands.

/// Command succeeded, or the execution still has work left.
pub const OK: i32 = 0;
/// Command failed due to invalid config, templates, execution id, or other errors.
pub const INVALID: i32 = 1;
/// `taggroup status` found every step completed or skipped.
pub const COMPLETE: i32 = 2;
/// A failed step blocks the execution from completing.
pub const BLOCKED: i32 = 3;
