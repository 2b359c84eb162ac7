//! Structured logging with pretty/JSON/compact console output and file rotation
//!
//! Console output goes to stderr so command output on stdout stays clean.

use std::io;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::{FileLoggingConfig, LogFormat, LoggingConfig, RotationStrategy};
use crate::error::{ObservabilityError, Result};

/// Guard that must be held to keep the async file writer running
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

impl LogGuard {
    fn new(guard: Option<WorkerGuard>) -> Self {
        Self { _guard: guard }
    }

    /// Whether a file writer is attached.
    pub fn has_file_writer(&self) -> bool {
        self._guard.is_some()
    }
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Initialize logging with the given configuration
///
/// `RUST_LOG` wins over the configured level or directives. Returns a guard
/// that must be held for the lifetime of the application so file logs are
/// flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let env_filter = build_filter(config)?;

    let (file_layer, guard) = match &config.file {
        Some(file_config) => {
            let (writer, guard) = create_file_writer(file_config)?;
            (Some(file_layer(config, writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer(config))
        .with(file_layer)
        .try_init()
        .map_err(|e| ObservabilityError::LoggingInit(e.to_string()))?;

    Ok(LogGuard::new(guard))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(config.default_directives())
        .map_err(|e| ObservabilityError::Config(format!("invalid filter directives: {e}")))
}

fn console_layer<S>(config: &LoggingConfig) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

fn file_layer<S>(config: &LoggingConfig, writer: NonBlocking) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_ansi(false)
        .json()
        .boxed()
}

fn create_file_writer(config: &FileLoggingConfig) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(&config.directory)?;

    let file_appender = match config.rotation {
        RotationStrategy::Daily => tracing_appender::rolling::daily(&config.directory, &config.prefix),
        RotationStrategy::Hourly => {
            tracing_appender::rolling::hourly(&config.directory, &config.prefix)
        }
        RotationStrategy::Never => tracing_appender::rolling::never(&config.directory, &config.prefix),
    };

    Ok(tracing_appender::non_blocking(file_appender))
}
