//! Unified logging module for wallbox services
//!
//! Console output plus an optional daily-rolling log file, with a reloadable
//! filter so the level can be changed while the service runs.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use errors::{WallboxError, WallboxResult};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809000Z [INFO] Station garage: cycle ok`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the process lifetime
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static LOG_FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "wallboxsrv"), used as filter target and file prefix
    pub service_name: String,
    /// Directory for log files; console only when `None`
    pub log_dir: Option<PathBuf>,
    /// Console log level
    pub console_level: Level,
    /// File log level
    pub file_level: Level,
    /// Enable JSON format for the log file
    pub enable_json: bool,
    /// Disable ANSI colors on the console
    pub no_color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "wallboxsrv".to_string(),
            log_dir: None,
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            enable_json: false,
            no_color: false,
        }
    }
}

impl LogConfig {
    /// Filter used when `RUST_LOG` is not set
    pub fn default_filter(&self) -> String {
        format!(
            "info,{}={}",
            self.service_name,
            self.console_level.as_str().to_lowercase()
        )
    }
}

/// Initialize the global subscriber
///
/// `RUST_LOG` takes precedence over the configured levels.
pub fn init_with_config(config: LogConfig) -> WallboxResult<()> {
    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| config.default_filter());
    let env_filter = EnvFilter::try_new(&filter_str)
        .map_err(|e| WallboxError::config(format!("Invalid log filter '{}': {}", filter_str, e)))?;

    let (reload_filter, reload_handle) = reload::Layer::new(env_filter);
    let registry = tracing_subscriber::registry().with(reload_filter);

    // stderr keeps stdout free for command output
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!config.no_color)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);

            let level = LevelFilter::from_level(config.file_level);
            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_filter(level)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .with_filter(level)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| WallboxError::runtime(format!("Logging already initialized: {}", e)))?;

    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let _ = CURRENT_LOG_LEVEL.set(Mutex::new(filter_str));

    match &config.log_dir {
        Some(dir) => tracing::info!("Logging: {} @ {:?}", config.service_name, dir),
        None => tracing::info!("Logging: {} @ console", config.service_name),
    }

    Ok(())
}

/// Initialize console logging at the given level
pub fn init(level: &str) -> WallboxResult<()> {
    let config = LogConfig {
        console_level: level.parse().unwrap_or(Level::INFO),
        ..Default::default()
    };
    init_with_config(config)
}

/// Dynamically set log filter level at runtime
///
/// Accepts a plain level (`"debug"`) or a full filter directive (`"info,wallboxsrv=debug"`).
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;

    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        if let Ok(mut guard) = current.lock() {
            *guard = level.to_string();
        }
    }

    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Get current log filter level
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}
