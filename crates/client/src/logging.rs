//! Tracing subscriber setup for the `wterm` binary.
//!
//! Logs go to stderr (or a file) through a non-blocking writer so that
//! terminal output on stdout stays clean and is never stalled by logging.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Socket-level crates whose trace output drowns everything else.
const NOISY_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "mio"];

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to configure logger: {0}")]
    Configure(String),
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. The returned guard flushes
/// buffered log lines when dropped and must be held until exit.
pub fn init(level: &str, file: Option<&Path>) -> Result<WorkerGuard, LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let (writer, guard) = match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(file.is_none())
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::Configure(e.to_string()))?;

    Ok(guard)
}

/// Builds the filter used when `RUST_LOG` is not set.
pub fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(filter_directives(level))
}

fn filter_directives(level: &str) -> String {
    let level = level.to_lowercase();
    let mut directives = level.clone();
    if level == "trace" || level == "debug" {
        for target in NOISY_TARGETS {
            directives.push_str(&format!(",{target}=info"));
        }
    }
    directives
}
