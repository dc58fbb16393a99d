//! Session log: console plus one file per session

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// `<dir>/agent_<YYYYmmdd_HHMMSS>.log`
pub fn log_file_path(dir: &Path, now: chrono::DateTime<chrono::Local>) -> PathBuf {
    dir.join(format!("agent_{}.log", now.format("%Y%m%d_%H%M%S")))
}

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
///
/// Returns the path of the session log file.
pub fn init(dir: &Path, verbose: bool) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    let path = log_file_path(dir, chrono::Local::now());
    let file =
        File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(path)
}
