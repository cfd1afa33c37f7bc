//! Tracing setup for the controller and its workers.
//!
//! [`init_cli`] logs to stderr only. [`init_production`] adds a daily-rotated
//! JSON file under the configured log directory; controller and worker
//! processes share that file, and the `worker{id}` span tells them apart.
//!
//! `RUST_LOG` wins over the verbosity flag when set.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the rotated JSON log.
pub const LOG_FILE_PREFIX: &str = "detqa.log";

/// Keeps the file writer alive; dropping it flushes pending lines.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "info"
    } else {
        "error"
    }
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Log to stderr and to `{logs_dir}/detqa.log.YYYY-MM-DD` as JSON.
///
/// Hold the returned guard until the process exits.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created.
pub fn init_production(logs_dir: &Path, verbose: bool) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Log to stderr only.
pub fn init_cli(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::io::stderr)
        .init();
}
