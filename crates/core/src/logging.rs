use std::ffi::OsStr;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Keeps the non-blocking file writer flushing for the process lifetime.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static LOG_INIT: OnceCell<()> = OnceCell::new();

/// Install console + file logging. Later calls are no-ops.
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_logging(log_path: &Path) -> Result<()> {
    LOG_INIT.get_or_try_init(|| configure(log_path)).map(|_| ())
}

fn configure(log_path: &Path) -> Result<()> {
    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(log_dir)?;
    let file_name = log_path
        .file_name()
        .unwrap_or_else(|| OsStr::new("photoindex.log"));

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_writer(std::io::stdout);
    let file_layer = fmt::layer().with_ansi(false).with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already configured: {e}")))?;
    Ok(())
}
