//! Shared plumbing for the command-line tools.

use anyhow::{Context, Result};
use htn_utils::input::Input;
use std::path::Path;

/// Initializes the tracing subscriber. `verbosity` maps onto the levels of
/// the original debug flag: 0 prints warnings only, 1-5 informational
/// messages, anything above that full debug output. The `RUST_LOG`
/// environment variable overrides the flag.
pub fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1..=5 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads a file, attaching its name to any error.
pub fn read_input(path: &Path) -> Result<Input> {
    Input::from_file(path).with_context(|| format!("While reading {}", path.display()))
}
