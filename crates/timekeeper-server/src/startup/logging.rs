//! Logging setup.
//!
//! Console output goes to stderr. An optional `timekeeper.log` file rotates
//! daily under the configured log directory. `RUST_LOG` takes precedence
//! over the configured level for both outputs.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const LOG_FILE_NAME: &str = "timekeeper.log";

/// Logging configuration for the whole process.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for the rolling log file
    pub log_dir: PathBuf,
    /// Enable stderr output
    pub console_output: bool,
    /// Enable file logging
    pub file_logging: bool,
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir().join("timekeeper").join("logs"),
            console_output: true,
            file_logging: false,
            level: Level::INFO,
        }
    }
}

/// Keeps the non-blocking file writer alive; buffered output is flushed on drop.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Install the global subscriber.
///
/// The returned [`LoggingGuard`] must be held until the process exits.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_filter(env_filter(config.level));
        layers.push(Box::new(console_layer));
    }

    let file_guard = if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(env_filter(config.level));
        layers.push(Box::new(file_layer));
        Some(guard)
    } else {
        None
    };

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            "File logging initialized: {}",
            LOG_FILE_NAME
        );
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
