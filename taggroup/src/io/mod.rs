//! I/O helpers for the engine and CLI.

pub mod config;
pub mod executor;
pub mod export;
pub mod init;
pub mod process;
pub mod store;
pub mod templates;
