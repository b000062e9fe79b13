use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "galaxy-backend.log";

/// Keeps the non-blocking file writer alive; drop flushes it
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Where (and whether) to write rolling log files
#[derive(Debug, Clone)]
pub struct FileLogSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl FileLogSettings {
    pub fn from_env() -> Self {
        let enabled = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let dir = std::env::var("LOG_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./logs"));
        Self { enabled, dir }
    }
}

pub fn init_tracing(log_level: &str, files: &FileLogSettings) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);

    if files.enabled {
        match std::fs::create_dir_all(&files.dir) {
            Err(err) => {
                eprintln!("failed to create log directory {}: {err}", files.dir.display());
            }
            Ok(()) => {
                let file_appender = RollingFileAppender::new(Rotation::DAILY, &files.dir, LOG_FILE_PREFIX);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                let file_layer = fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(true);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer)
                    .init();

                return Some(FileLogGuard { _guard: guard });
            }
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();

    None
}
