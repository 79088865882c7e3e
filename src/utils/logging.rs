//! Diagnostic logging for the binary.
//!
//! Library code only emits `tracing` events; this module installs the
//! subscriber that formats them.

use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Picks the filter: a non-empty `RUST_LOG` wins over the configured level.
pub fn build_filter(env_value: Option<&str>, configured: &str) -> Result<EnvFilter, String> {
    let directives = match env_value.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => configured,
    };
    EnvFilter::try_new(directives)
        .map_err(|err| format!("Invalid log filter '{directives}': {err}"))
}

/// Installs the global subscriber, writing to `log_file` when given and to
/// stderr otherwise.
pub fn init_tracing(configured: &str, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let env_value = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(env_value.as_deref(), configured)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| format!("Failed to open log file {}: {err}", path.display()))?;
            builder
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
                .map_err(|err| err.to_string())?;
        }
        None => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|err| err.to_string())?;
        }
    }
    Ok(())
}
