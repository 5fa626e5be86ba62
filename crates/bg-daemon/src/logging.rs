use std::path::Path;

use color_eyre::eyre::eyre;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, otherwise `info` (or `debug` with `--debug`).
pub fn filter(debug: bool) -> EnvFilter {
    let default_level = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Subscriber writing to `path` through a non-blocking worker.
/// Buffered lines reach the file when the guard is dropped.
pub fn file_subscriber(
    path: &Path,
    filter: EnvFilter,
) -> color_eyre::Result<(impl tracing::Subscriber + Send + Sync + 'static, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("log file path {} has no file name", path.display()))?;
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .with_ansi(false)
        .finish();
    Ok((subscriber, guard))
}

/// Log to stderr, or to `log_file`. The returned guard must outlive every
/// log call, including the last one before the process exits.
pub fn init(debug: bool, log_file: Option<&Path>) -> color_eyre::Result<Option<WorkerGuard>> {
    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter(debug))
            .try_init()
            .map_err(|e| eyre!(e))?;
        return Ok(None);
    };

    let (subscriber, guard) = file_subscriber(path, filter(debug))?;
    subscriber.try_init().map_err(|e| eyre!(e))?;
    Ok(Some(guard))
}
