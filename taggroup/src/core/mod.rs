//! Deterministic, pure logic for the tag-group engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests. The
//! only ambient input is the wall clock used to stamp step timestamps.

pub mod carry_over;
pub mod error;
pub mod execution;
pub mod invariants;
pub mod progress;
pub mod resolver;
pub mod summary;
pub mod types;
