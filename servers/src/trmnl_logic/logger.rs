use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_PREFIX: &str = "server_trmnl";

/// Maps a configured level onto one `EnvFilter` understands.
/// Unknown values fall back to `info`; `fatal` means `error`.
pub fn normalize_level(log_level: &str) -> &'static str {
    match log_level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "fatal" => "error",
        _ => "info",
    }
}

/// # Setup Logging
///
/// Console output is human-readable with ANSI colors; the daily rotating
/// file under `log_dir` gets JSON lines. `RUST_LOG` overrides `log_level`.
///
/// The returned guard flushes the file writer on drop and must be held by
/// `main` for the life of the process.
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let level = normalize_level(log_level);
    let env_filter: EnvFilter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!("Logging initialized with level: {}", level);
    Ok(guard)
}
