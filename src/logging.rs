//! Structured logging setup.
//!
//! Console output plus an optional daily-rolling file. The filter defaults to
//! `info,essp_controller=debug` and honours `RUST_LOG`.

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,essp_controller=debug";
const LOG_FILE_PREFIX: &str = "essp";
const DEFAULT_MAX_LOG_FILES: usize = 10;

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Directory for rolling log files; console only when `None`.
    pub log_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
    /// Rolled files kept in `log_dir`; older ones are deleted at init.
    pub max_files: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_dir: None,
            default_filter: DEFAULT_FILTER.to_string(),
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}

impl LogOptions {
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Install the global subscriber. Keep the returned guard alive for as long
/// as file logging should work; dropping it flushes pending lines.
pub fn init(options: LogOptions) -> Result<Option<WorkerGuard>, String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));
    let console_layer = fmt::layer().with_target(true);

    let Some(log_dir) = options.log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| format!("Failed to install logger: {e}"))?;
        return Ok(None);
    };

    fs::create_dir_all(&log_dir)
        .map_err(|e| format!("Failed to create log dir {}: {e}", log_dir.display()))?;
    prune_old_logs(&log_dir, options.max_files);

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| format!("Failed to install logger: {e}"))?;

    Ok(Some(guard))
}

/// Delete all but the newest `keep` log files in `dir`. Returns the number
/// removed.
pub fn prune_old_logs(dir: &std::path::Path, keep: usize) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            if !path.is_file() || !name.starts_with(LOG_FILE_PREFIX) {
                return None;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.into_iter().skip(keep) {
        if fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
