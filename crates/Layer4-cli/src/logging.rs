//! Logging setup
//!
//! Always logs to stderr. With a log directory, `serve` also writes
//! `combined.*.log` (everything) and `error.*.log` (errors only), rotated
//! daily with the last few files kept.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Rotated files kept per log
const MAX_LOG_FILES: usize = 5;

/// Build a daily-rotated appender `<dir>/<prefix>.<date>.log`
pub fn log_appender(dir: &Path, prefix: &str) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)?;
    Ok(appender)
}

/// Install the global subscriber
///
/// The returned guards flush the file writers on drop; keep them alive
/// until the process exits.
pub fn init(debug: bool, log_dir: Option<&Path>) -> anyhow::Result<Vec<WorkerGuard>> {
    let log_level = if debug { "debug" } else { "info" };
    let mut guards = Vec::new();

    let file_layers = match log_dir {
        Some(dir) => {
            let (combined, combined_guard) =
                tracing_appender::non_blocking(log_appender(dir, "combined")?);
            let (errors, errors_guard) =
                tracing_appender::non_blocking(log_appender(dir, "error")?);
            guards.push(combined_guard);
            guards.push(errors_guard);

            let combined_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(combined);
            let error_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(errors)
                .with_filter(LevelFilter::ERROR);
            Some(combined_layer.and_then(error_layer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layers)
        .init();

    if let Some(dir) = log_dir {
        tracing::info!("Writing logs to {}", dir.display());
    }
    Ok(guards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_appender_creates_dir_and_file() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("logs");

        let mut appender = log_appender(&dir, "combined").unwrap();
        writeln!(appender, "hello").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("combined."));
        assert!(names[0].ends_with(".log"));
    }
}
