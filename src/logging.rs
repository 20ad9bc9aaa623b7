//! File-based logging with retention cleanup.
//!
//! Logs go to `<config-dir>/logs/` so the TUI never fights tracing output
//! for the terminal. Secrets (passphrases, passwords, key material, tokens)
//! are never logged at any level.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 72;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log retention period in hours.
    pub retention_hours: u32,
    /// Log level (trace, debug, info, warn, error, off).
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Returns the path for a fresh log file inside `log_dir`.
fn new_log_path(log_dir: &Path) -> PathBuf {
    let now = chrono::Local::now();
    log_dir.join(format!("davit_{}.log", now.format("%Y-%m-%d_%H-%M-%S")))
}

/// Deletes log files older than the retention period.
pub fn cleanup_old_logs(log_dir: &Path, retention_hours: u32) -> io::Result<u32> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let retention = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                if let Ok(age) = now.duration_since(modified) {
                    if age > retention && fs::remove_file(&path).is_ok() {
                        deleted += 1;
                    }
                }
            }
        }
    }

    Ok(deleted)
}

/// Initializes file logging into `log_dir`.
///
/// Old logs past retention are cleaned up first. `RUST_LOG` overrides the
/// configured level.
pub fn init(log_dir: &Path, config: &LogConfig) -> io::Result<()> {
    if config.level == "off" {
        return Ok(());
    }

    fs::create_dir_all(log_dir)?;
    let deleted = cleanup_old_logs(log_dir, config.retention_hours)?;

    let log_path = new_log_path(log_dir);
    let log_file = File::create(&log_path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let file_layer = fmt::layer()
        .with_writer(log_file.with_max_level(tracing::Level::TRACE))
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!("logging initialized at {}", log_path.display());
    if deleted > 0 {
        tracing::info!("cleaned up {deleted} old log file(s)");
    }

    Ok(())
}
