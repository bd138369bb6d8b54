use std::io;
use std::path::Path;

use anyhow::Context;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Daily files are named `command-service.log.YYYY-MM-DD`.
pub(crate) const LOG_FILE_PREFIX: &str = "command-service.log";

/// Installs the global subscriber: JSON lines into `log_dir`, plus a
/// human-readable stderr copy when asked. `RUST_LOG` wins over
/// `default_level`. Keep the returned guard alive until shutdown so buffered
/// lines are flushed.
pub(crate) fn init_tracing(
    log_dir: &Path,
    default_level: &str,
    log_to_stderr: bool,
) -> anyhow::Result<WorkerGuard> {
    let (file_writer, file_guard) = file_writer(log_dir)?;
    let stderr_layer = log_to_stderr.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter(default_level)?)
        .with(json_file_layer(file_writer))
        .with(stderr_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(file_guard)
}

fn file_writer(log_dir: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

fn json_file_layer<S>(writer: NonBlocking) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_ansi(false)
        .json()
}

fn env_filter(default_level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("invalid log level {default_level:?}")),
    }
}
