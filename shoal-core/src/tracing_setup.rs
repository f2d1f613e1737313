//! Logging for swarm runs.
//!
//! The console shows events from the shoal crates at the level picked on the
//! command line. The run log keeps everything they emit, tagged with the node
//! span it happened in, and is overwritten by the next run.

use std::fs::{File, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run log file inside the logs directory.
pub const LOG_FILE_NAME: &str = "shoal-last-run.log";

/// Environment variable holding filter directives that replace the console level.
pub const LOG_ENV: &str = "SHOAL_LOG";

const DEFAULT_LOGS_DIR: &str = "logs";

/// Installs the console and run-log subscribers.
///
/// Returns the path of the run log.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - If the run log cannot be opened, or a
///   global subscriber is already installed
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let (run_log, run_log_path) =
        open_run_log(logs_dir.unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR)))?;

    let console_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_filter(console_filter(console_level));

    // Span close events carry each node's lifetime.
    let file_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(run_log)
        .with_filter(shoal_filter(Level::TRACE));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(run_log_path)
}

/// Creates the logs directory if needed and truncates the run log.
///
/// # Errors
///
/// - `io::Error` - If the directory or the file cannot be created
pub fn open_run_log(logs_dir: &Path) -> io::Result<(File, PathBuf)> {
    create_dir_all(logs_dir)?;
    let path = logs_dir.join(LOG_FILE_NAME);
    let file = File::create(&path)?;
    Ok((file, path))
}

fn console_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| shoal_filter(level))
}

/// `level` for the shoal crates, warnings only for dependencies.
fn shoal_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_lowercase();
    EnvFilter::new(format!("warn,shoal_core={level},shoal={level}"))
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Failed nodes only
    Error,
    /// Also unknown files and ignored messages
    Warn,
    /// Lifecycle events: registration, completion, termination
    #[default]
    Info,
    /// Per-request traffic
    Debug,
    /// Every availability answer
    Trace,
}

impl From<CliLogLevel> for Level {
    /// ```
    /// use shoal_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(tracing::Level::from(CliLogLevel::Info), tracing::Level::INFO);
    /// ```
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(CliLogLevel::Error),
            "warn" => Ok(CliLogLevel::Warn),
            "info" => Ok(CliLogLevel::Info),
            "debug" => Ok(CliLogLevel::Debug),
            "trace" => Ok(CliLogLevel::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&Level::from(*self).as_str().to_lowercase())
    }
}
