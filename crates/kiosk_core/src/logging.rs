//! Kiosk log files.
//!
//! # Responsibility
//! - Start the rotating kiosk log from the `logging` config section.
//! - Write one startup line and route panics from every kiosk thread (reader,
//!   channel workers, scheduler) into the log.
//!
//! # Invariants
//! - At most one logger per process. Starting it again with the same
//!   settings is a no-op; different settings are rejected.
//! - Nothing in here panics.
//! - Log lines carry `event=... module=... status=...` metadata, never
//!   credentials or token bytes.

use crate::config::LoggingConfig;
use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle, Naming,
    WriteMode,
};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

const LOG_FILE_BASENAME: &str = "kiosk";
const BYTES_PER_MB: u64 = 1024 * 1024;
const MAX_PANIC_MESSAGE_CHARS: usize = 160;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

#[derive(Debug)]
pub enum LoggingError {
    InvalidLevel(String),
    /// Log directory is empty or relative.
    InvalidDirectory(PathBuf),
    InvalidRotation(String),
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    Backend(FlexiLoggerError),
    /// The process logger already runs with other settings.
    AlreadyStarted {
        active: Box<LogSettings>,
        requested: Box<LogSettings>,
    },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLevel(value) => write!(
                f,
                "unsupported log level `{value}`; expected off|error|warn|info|debug|trace"
            ),
            Self::InvalidDirectory(path) => write!(
                f,
                "log directory must be a non-empty absolute path, got `{}`",
                path.display()
            ),
            Self::InvalidRotation(message) => write!(f, "invalid log rotation: {message}"),
            Self::CreateDirectory { path, source } => write!(
                f,
                "failed to create log directory `{}`: {source}",
                path.display()
            ),
            Self::Backend(err) => write!(f, "failed to start logger: {err}"),
            Self::AlreadyStarted { active, requested } => write!(
                f,
                "logging already runs with level={} dir=`{}`; refusing level={} dir=`{}`",
                active.level,
                active.dir.display(),
                requested.level,
                requested.dir.display()
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDirectory { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            Self::InvalidLevel(_)
            | Self::InvalidDirectory(_)
            | Self::InvalidRotation(_)
            | Self::AlreadyStarted { .. } => None,
        }
    }
}

/// Validated form of `LoggingConfig` with a directory set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub dir: PathBuf,
    pub max_file_bytes: u64,
    pub keep_files: usize,
    /// Also print warnings and errors to stderr.
    pub echo_warnings: bool,
}

impl LogSettings {
    /// Returns `Ok(None)` when the config does not name a log directory.
    pub fn from_config(config: &LoggingConfig) -> Result<Option<Self>, LoggingError> {
        let level = parse_level(&config.level)?;
        let Some(dir) = config.dir.as_ref() else {
            return Ok(None);
        };
        if dir.as_os_str().is_empty() || !dir.is_absolute() {
            return Err(LoggingError::InvalidDirectory(dir.clone()));
        }
        if config.max_file_mb == 0 {
            return Err(LoggingError::InvalidRotation(
                "max_file_mb must be positive".to_string(),
            ));
        }
        if config.keep_files == 0 {
            return Err(LoggingError::InvalidRotation(
                "keep_files must be positive".to_string(),
            ));
        }
        let max_file_bytes = config.max_file_mb.checked_mul(BYTES_PER_MB).ok_or_else(|| {
            LoggingError::InvalidRotation(format!("max_file_mb {} is too large", config.max_file_mb))
        })?;

        Ok(Some(Self {
            level,
            dir: dir.clone(),
            max_file_bytes,
            keep_files: config.keep_files,
            echo_warnings: config.echo_warnings,
        }))
    }
}

/// Starts the kiosk log described by `config`.
///
/// Returns `Ok(false)` without touching the logger when no directory is
/// configured, `Ok(true)` once the log is active.
pub fn init_from_config(config: &LoggingConfig) -> Result<bool, LoggingError> {
    match LogSettings::from_config(config)? {
        Some(settings) => start(settings).map(|()| true),
        None => Ok(false),
    }
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

pub fn parse_level(value: &str) -> Result<LevelFilter, LoggingError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "warning" => Ok(LevelFilter::Warn),
        other => other
            .parse()
            .map_err(|_| LoggingError::InvalidLevel(value.trim().to_string())),
    }
}

fn start(settings: LogSettings) -> Result<(), LoggingError> {
    let active = ACTIVE_LOGGER.get_or_try_init(|| open_logger(&settings))?;
    if active.settings != settings {
        return Err(LoggingError::AlreadyStarted {
            active: Box::new(active.settings.clone()),
            requested: Box::new(settings),
        });
    }
    Ok(())
}

fn open_logger(settings: &LogSettings) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(&settings.dir).map_err(|source| LoggingError::CreateDirectory {
        path: settings.dir.clone(),
        source,
    })?;

    let echo = if settings.echo_warnings {
        Duplicate::Warn
    } else {
        Duplicate::None
    };
    let handle = Logger::try_with_str(settings.level.as_str().to_ascii_lowercase())
        .map_err(LoggingError::Backend)?
        .log_to_file(
            FileSpec::default()
                .directory(settings.dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(settings.max_file_bytes),
            Naming::Numbers,
            Cleanup::KeepLogFiles(settings.keep_files),
        )
        .duplicate_to_stderr(echo)
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(LoggingError::Backend)?;

    PANIC_HOOK.get_or_init(install_panic_hook);
    info!(
        "event=kiosk_start module=logging status=ok version={} os={} level={} log_dir={} max_file_bytes={} keep_files={}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        settings.level,
        settings.dir.display(),
        settings.max_file_bytes,
        settings.keep_files
    );

    Ok(ActiveLogger {
        settings: settings.clone(),
        _handle: handle,
    })
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map_or_else(|| "unknown".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        error!(
            "event=panic_captured module=logging status=error thread={} location={location} message={}",
            std::thread::current().name().unwrap_or("unnamed"),
            panic_message(info.payload())
        );
        previous(info);
    }));
}

/// Single-line, length-capped rendering of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    let raw = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");

    let mut message: String = raw
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .take(MAX_PANIC_MESSAGE_CHARS)
        .collect();
    if raw.chars().count() > MAX_PANIC_MESSAGE_CHARS {
        message.push_str("...");
    }
    message
}
