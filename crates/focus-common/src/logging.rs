//! Logging configuration and initialization
//!
//! Every pipeline binary initializes `tracing` through this module so that
//! extraction, mapping and transform events share one format. Supported:
//!
//! - console (stderr), daily-rolling file, or both
//! - human-readable text or JSON lines
//! - per-module filter directives on top of a base level
//!
//! Console output goes to stderr because the CLI reserves stdout for batch
//! summaries and cost breakdowns.
//!
//! Library code logs with structured fields rather than interpolated strings:
//!
//! ```rust,ignore
//! use tracing::warn;
//!
//! warn!(model = %model, pricing_version = PRICING_VERSION, "No price entry for model");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use focus_common::logging::{init_logging, LogConfig, LogLevel};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::builder()
//!         .level(LogLevel::Debug)
//!         .log_file_prefix("focus-ingest")
//!         .build();
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Accepted spellings per variant; the first entry is the display name
type Choices<T> = &'static [(&'static str, T)];

fn parse_choice<T: Copy>(kind: &str, input: &str, choices: Choices<T>) -> Result<T> {
    let wanted = input.trim().to_lowercase();
    choices
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, value)| *value)
        .ok_or_else(|| anyhow!("Invalid log {kind}: {input}"))
}

fn choice_name<T: Copy + PartialEq>(value: T, choices: Choices<T>) -> &'static str {
    choices
        .iter()
        .find(|(_, v)| *v == value)
        .map(|(name, _)| *name)
        .unwrap_or("unknown")
}

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const CHOICES: Choices<Self> = &[
        ("trace", LogLevel::Trace),
        ("debug", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("warning", LogLevel::Warn),
        ("error", LogLevel::Error),
    ];

    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Level used by the CLI for its `--verbose` flag
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

/// Where formatted lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    const CHOICES: Choices<Self> = &[
        ("console", LogOutput::Console),
        ("stderr", LogOutput::Console),
        ("file", LogOutput::File),
        ("both", LogOutput::Both),
        ("all", LogOutput::Both),
    ];

    fn writes_console(self) -> bool {
        self != LogOutput::File
    }

    fn writes_file(self) -> bool {
        self != LogOutput::Console
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    const CHOICES: Choices<Self> = &[
        ("text", LogFormat::Text),
        ("pretty", LogFormat::Text),
        ("json", LogFormat::Json),
    ];
}

macro_rules! named_choice {
    ($ty:ty, $kind:literal) => {
        impl std::str::FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                parse_choice($kind, s, Self::CHOICES)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(choice_name(*self, Self::CHOICES))
            }
        }
    };
}

named_choice!(LogLevel, "level");
named_choice!(LogOutput, "output");
named_choice!(LogFormat, "format");

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Directory for daily-rolling files
    pub log_dir: PathBuf,
    /// File name prefix, e.g. "focus-ingest" -> "focus-ingest.2025-01-18"
    pub log_file_prefix: String,
    /// Extra directives such as "focus_ingest::extract=debug,sqlx=warn"
    pub filter_directives: Option<String>,
    /// Source file and line on every event
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "focus".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

fn env_flag(name: &str, fallback: bool) -> Option<bool> {
    std::env::var(name).ok().map(|v| v.trim().parse().unwrap_or(fallback))
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `LOG_*` environment variables, see [`LogConfig::merge_env`]
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Replace fields whose `LOG_*` variable is set; unset variables keep
    /// the current value.
    ///
    /// Reads `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`,
    /// `LOG_FILE_PREFIX`, `LOG_FILTER` and the `LOG_INCLUDE_LOCATION`,
    /// `LOG_INCLUDE_THREAD_IDS`, `LOG_INCLUDE_TARGETS` flags.
    pub fn merge_env(mut self) -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok();

        if let Some(level) = var("LOG_LEVEL") {
            self.level = level.parse()?;
        }
        if let Some(output) = var("LOG_OUTPUT") {
            self.output = output.parse()?;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.format = format.parse()?;
        }
        self.log_dir = var("LOG_DIR").map(PathBuf::from).unwrap_or(self.log_dir);
        self.log_file_prefix = var("LOG_FILE_PREFIX").unwrap_or(self.log_file_prefix);
        self.filter_directives = var("LOG_FILTER").or(self.filter_directives);
        self.include_location = env_flag("LOG_INCLUDE_LOCATION", false).unwrap_or(self.include_location);
        self.include_thread_ids =
            env_flag("LOG_INCLUDE_THREAD_IDS", false).unwrap_or(self.include_thread_ids);
        self.include_targets = env_flag("LOG_INCLUDE_TARGETS", true).unwrap_or(self.include_targets);

        Ok(self)
    }

    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    /// `RUST_LOG`, then the base level, then configured directives
    fn env_filter(&self) -> Result<EnvFilter> {
        let mut directives = self
            .filter_directives
            .iter()
            .flat_map(|d| d.split(','))
            .map(str::trim)
            .filter(|d| !d.is_empty());

        directives.try_fold(
            EnvFilter::from_default_env().add_directive(self.level.to_tracing_level().into()),
            |filter, directive| {
                let parsed = directive
                    .parse()
                    .with_context(|| format!("Failed to parse filter directive '{directive}'"))?;
                Ok(filter.add_directive(parsed))
            },
        )
    }
}

/// Builder for [`LogConfig`]; flags without a setter are plain fields
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    pub fn filter_directives(mut self, filter: impl Into<String>) -> Self {
        self.config.filter_directives = Some(filter.into());
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

/// Keeps the non-blocking file writer alive.
///
/// Dropping it flushes buffered lines, so binaries hold it until `main` returns.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global `tracing` subscriber described by `config`.
///
/// Must be called at most once per process.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard> {
    let filter = config.env_filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guard = None;

    if config.output.writes_console() {
        layers.push(fmt_layer(config, std::io::stderr, true));
    }

    if config.output.writes_file() {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt_layer(config, writer, false));
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LoggingGuard { _file: file_guard })
}

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.include_targets)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(FmtSpan::CLOSE);

    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!(" DEBUG ".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_verbose_flag_maps_to_debug() {
        assert_eq!(LogLevel::from_verbose(true), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbose(false), LogLevel::Info);
    }

    #[test]
    fn test_output_targets() {
        assert_eq!("stderr".parse::<LogOutput>().unwrap(), LogOutput::Console);
        assert!(LogOutput::Both.writes_console());
        assert!(LogOutput::Both.writes_file());
        assert!(!LogOutput::Console.writes_file());
        assert!(!LogOutput::File.writes_console());
    }

    #[test]
    fn test_format_round_trips_through_display() {
        for format in [LogFormat::Text, LogFormat::Json] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_config_builder() {
        let config = LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::File)
            .format(LogFormat::Json)
            .log_dir("/var/log/focus")
            .log_file_prefix("focus-ingest")
            .filter_directives("sqlx=warn")
            .build();

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.output, LogOutput::File);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/focus"));
        assert_eq!(config.log_file_prefix, "focus-ingest");
        assert_eq!(config.filter_directives.as_deref(), Some("sqlx=warn"));
    }

    #[test]
    fn test_invalid_filter_directive_is_reported() {
        let config = LogConfig::builder().filter_directives("focus_ingest=[[").build();
        assert!(config.env_filter().is_err());
    }
}
