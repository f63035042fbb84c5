//! `tracing` subscriber setup shared by the binaries.

use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the log filter, e.g. `XCTPLAN_LOG=debug`.
pub const LOG_ENV: &str = "XCTPLAN_LOG";

/// Installs a stderr subscriber. `-q` keeps errors only, `-v` adds debug
/// output; `XCTPLAN_LOG` wins over both.
pub fn init_tracing(quiet: bool, verbose: bool) -> Result<(), String> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|error| format!("failed to initialize tracing subscriber: {error}"))
}
