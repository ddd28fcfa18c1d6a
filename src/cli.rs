//! Helpers shared by the command-line tools

use std::fmt::Display;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Log to stderr; `RUST_LOG` takes precedence over the default level
pub fn init_logging(quiet: bool) {
    let default = if quiet { "off" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Unwrap a required option or fail with `msg`
pub fn require<T>(value: Option<T>, msg: &str) -> anyhow::Result<T> {
    value.ok_or_else(|| anyhow::anyhow!("{}", msg))
}

/// Fail with `Couldn't stat <what> <path>` unless the path exists
pub fn check_exists(path: &Path, what: &str) -> anyhow::Result<()> {
    if std::fs::metadata(path).is_err() {
        anyhow::bail!("Couldn't stat {} {}", what, path.display());
    }
    Ok(())
}

/// Print a failure to stderr and map it to the process exit code
pub fn report<E: Display>(result: Result<(), E>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
