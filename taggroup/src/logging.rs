//! Diagnostic tracing for the CLI.
//!
//! Diagnostics go to stderr so they never mix with command output on stdout
//! (ids, exports printed with `--out -`). Execution state is persisted by
//! `io::store` regardless of the log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Env var read before `RUST_LOG`, so the runner can be traced without
/// turning on logs for every other tool in the shell.
pub const LOG_ENV: &str = "TAGGROUP_LOG";

const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber: env filter, compact stderr output.
///
/// ```bash
/// TAGGROUP_LOG=taggroup=debug taggroup run --all exec-20250101_120000-abc123
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    // Ignore a second installation (e.g. when embedded in another binary).
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}
