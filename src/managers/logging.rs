//! Tracing setup
//!
//! A sidecar normally logs to stderr and lets the container runtime collect
//! the stream, so the console sink is always on and may emit JSON lines.
//! Setting `log_directory` adds a daily-rolling file sink next to it.

use crate::config::{expand_tilde, Config};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const LOG_FILE_PREFIX: &str = "backup-sidecar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Rolling file sink; console only when unset
    pub log_directory: Option<PathBuf>,
    /// Rotated files kept in `log_directory`
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            log_directory: None,
            max_files: 7,
        }
    }
}

impl LoggingConfig {
    pub fn from_config(config: &Config) -> Self {
        let settings = &config.logging;
        Self {
            level: Level::from_str(&settings.log_level).unwrap_or(Level::INFO),
            format: settings.format.parse().unwrap_or(LogFormat::Text),
            log_directory: settings.log_directory.as_deref().map(expand_tilde),
            max_files: settings.log_max_files,
        }
    }
}

/// Keeps the non-blocking file writer alive; dropping it flushes buffered lines
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn sink<W>(writer: W, format: LogFormat, ansi: bool, level: Level) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Text => layer.with_target(false).with_filter(env_filter(level)).boxed(),
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_filter(env_filter(level))
            .boxed(),
    }
}

/// Install the subscriber for a long-running process
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let mut layers: Vec<BoxedLayer> = vec![sink(
        std::io::stderr,
        config.format,
        config.format == LogFormat::Text,
        config.level,
    )];

    let mut file_guard = None;
    if let Some(ref dir) = config.log_directory {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory: {:?}", dir))?;
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, format!("{}.log", LOG_FILE_PREFIX));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(sink(writer, config.format, false, config.level));
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(ref dir) = config.log_directory {
        prune_rotated_logs(dir, config.max_files)?;
    }

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// Console-only logging for short commands that may run without a config
pub fn init_console_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(Level::INFO))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG` wins; otherwise our crate at `level`, dependencies at warn
fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,backup_sidecar={}", level)))
}

/// Delete all but the newest `keep` rotated files
fn prune_rotated_logs(dir: &Path, keep: u32) -> Result<()> {
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.contains(".log"))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .collect();
    files.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, path) in files.into_iter().skip(keep as usize) {
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed rotated log {:?}", path),
            Err(e) => tracing::warn!("Failed to remove rotated log {:?}: {}", path, e),
        }
    }
    Ok(())
}
