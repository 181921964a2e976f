use std::error::Error;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;
use crate::display;

/// Prefix of the daily log files
pub const LOG_FILE_PREFIX: &str = "aidm-export";

/// Daily rolling appender in `dir`, creating the directory first.
pub fn file_appender(dir: &Path) -> Result<RollingFileAppender, Box<dyn Error + Send + Sync>> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .build(dir)?;
    Ok(appender)
}

/// Installs the global subscriber.
///
/// Logs go to the rolling file in `logging.dir`. When that directory cannot
/// be written, a warning is printed and logs go to stderr instead. The
/// returned guard flushes the file writer on drop.
pub fn init(logging: &LoggingSettings) -> Option<WorkerGuard> {
    let filter = EnvFilter::new(logging.level.to_lowercase());

    match file_appender(&logging.dir) {
        Ok(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                // Disable ANSI colors for cleaner log files
                .with_ansi(false)
                .with_line_number(true)
                .with_file(true)
                .with_target(false)
                .with_env_filter(filter)
                .init();
            Some(guard)
        }
        Err(e) => {
            display::warn(
                &format!("Cannot write logs to {}: {}", logging.dir.display(), e),
                Some("Logging to stderr instead."),
            );
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_env_filter(filter)
                .init();
            None
        }
    }
}
