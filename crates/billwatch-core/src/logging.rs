//! Logging infrastructure for billwatch.
//!
//! Structured logging through the `tracing` ecosystem:
//!
//! - Console output to stderr, compact human-readable format
//! - Optional JSON lines file output to `~/.billwatch/logs/billwatch.log`
//!   (daily rolling), enabled with `--file`
//! - Verbosity names as accepted on the command line (`debug`, `info`,
//!   `warning`, `error`, `critical`), overridden by `RUST_LOG`
//!
//! ## Example
//!
//! ```no_run
//! use billwatch_core::logging;
//!
//! let _guard = logging::init_logging(None, "info", false).expect("logging init");
//! tracing::info!(nrows = 42, "got rows");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{BillingError, Result};

/// Crate targets whose level follows the verbosity flag. Everything else
/// (HTTP client internals) stays at `warn`.
const LOG_TARGETS: &[&str] = &[
    "billwatch",
    "billwatch_core",
    "billwatch_query",
    "billwatch_report",
    "billwatch_monitor",
];

/// Guard that must be held to ensure log flushing on shutdown.
///
/// Keep this guard alive for the lifetime of the application.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Map a verbosity name to a `tracing` level directive.
///
/// Accepts the command-line level names (case-insensitive):
/// `debug`, `info`, `warning`/`warn`, `error`, `critical`.
pub fn level_directive(verbosity: &str) -> Result<&'static str> {
    match verbosity.to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warning" | "warn" => Ok("warn"),
        "error" | "critical" => Ok("error"),
        other => Err(BillingError::internal(format!(
            "unknown verbosity {other:?}, choose one of DEBUG, INFO, WARNING, ERROR, CRITICAL"
        ))),
    }
}

fn default_filter(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(LOG_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Initialize the billwatch logging system.
///
/// # Arguments
///
/// * `log_dir` - Optional custom log directory. Defaults to `~/.billwatch/logs/`
/// * `verbosity` - Verbosity name, see [`level_directive`]
/// * `to_file` - Also write JSON lines to a daily rolling file in `log_dir`
///
/// # Returns
///
/// A [`LogGuard`] that must be held for the application lifetime.
pub fn init_logging(log_dir: Option<PathBuf>, verbosity: &str, to_file: bool) -> Result<LogGuard> {
    let level = level_directive(verbosity)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let detailed = matches!(level, "debug" | "trace");

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_file(detailed)
        .with_line_number(detailed)
        .compact();

    let (file_layer, file_guard) = if to_file {
        let log_dir = match log_dir {
            Some(dir) => dir,
            None => default_log_dir()?,
        };

        std::fs::create_dir_all(&log_dir).map_err(|e| BillingError::DirectoryCreation {
            path: log_dir.clone(),
            source: e,
        })?;

        let file_appender = tracing_appender::rolling::daily(&log_dir, "billwatch.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        let layer = fmt::layer()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .json()
            .with_current_span(true);

        (Some(layer.boxed()), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::debug!(level, to_file, "logging initialized");

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// Initialize minimal console-only logging for testing.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Get the default log directory path.
///
/// Returns `~/.billwatch/logs/`
pub fn default_log_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| BillingError::Internal {
        message: "HOME environment variable not set".into(),
    })?;

    Ok(PathBuf::from(home).join(".billwatch").join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_log_dir() {
        // SAFETY: serialized with every other test touching HOME
        unsafe { std::env::set_var("HOME", "/tmp/test-home") };
        let dir = default_log_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/test-home/.billwatch/logs"));
    }

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("INFO").unwrap(), "info");
        assert_eq!(level_directive("warning").unwrap(), "warn");
        assert_eq!(level_directive("CRITICAL").unwrap(), "error");
        assert!(level_directive("loud").is_err());
    }

    #[test]
    fn test_default_filter_scopes_crates() {
        let filter = default_filter("debug");
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("billwatch_monitor=debug"));
        assert!(filter.contains("billwatch=debug"));
    }

    #[test]
    fn test_init_test_logging() {
        init_test_logging();
    }
}
