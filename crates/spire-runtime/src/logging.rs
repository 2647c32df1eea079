//! Framework logging.
//!
//! Installs the global `tracing` subscriber from [`LoggingConfig`]. This is
//! the framework's own diagnostic output; the application-facing `log`
//! service in [`crate::provider::log`] writes to its own file.
//!
//! ```rust,ignore
//! use spire_runtime::logging::{LoggingBuilder, lifecycle_spans};
//!
//! let _guard = LoggingBuilder::new()
//!     .with_level(tracing::Level::DEBUG)
//!     .directive("spire_core=trace")
//!     .span_events(lifecycle_spans())
//!     .init();
//! ```
//!
//! File output goes through a non-blocking writer. Keep the returned
//! [`LoggingGuard`] alive for as long as records should be flushed.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Span events for a request span: opened and closed.
pub fn lifecycle_spans() -> FmtSpan {
    FmtSpan::NEW | FmtSpan::CLOSE
}

impl From<&SpanEventConfig> for FmtSpan {
    fn from(config: &SpanEventConfig) -> Self {
        [
            (config.new, FmtSpan::NEW),
            (config.enter, FmtSpan::ENTER),
            (config.exit, FmtSpan::EXIT),
            (config.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .fold(FmtSpan::NONE, |acc, (_, event)| acc | event)
    }
}

/// Keeps the non-blocking file writer alive.
///
/// Dropping it flushes pending records and stops the writer thread. Holds
/// nothing for console output.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

/// Initializes logging from a [`LoggingConfig`].
///
/// A subscriber that is already installed is left in place.
pub fn init_from_config(config: &LoggingConfig) -> LoggingGuard {
    LoggingBuilder::from_config(config).init()
}

/// A builder for the global `tracing` subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: tracing::Level,
    directives: Vec<String>,
    spans: FmtSpan,
    format: LogFormat,
    output: LogOutput,
    file_path: Option<PathBuf>,
    target: bool,
    thread_ids: bool,
    source_location: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    /// Compact output to stdout at `INFO`.
    pub fn new() -> Self {
        Self {
            level: tracing::Level::INFO,
            directives: Vec::new(),
            spans: FmtSpan::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            target: true,
            thread_ids: false,
            source_location: false,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort();

        let directives = filters
            .into_iter()
            .map(|(module, level)| format!("{module}={}", level.as_str()))
            .collect();

        Self {
            level: config.level.to_tracing_level(),
            directives,
            spans: FmtSpan::from(&config.span_events),
            format: config.format,
            output: config.output,
            file_path: config.file_path.clone(),
            thread_ids: config.thread_ids,
            source_location: config.file_location,
            ..Self::new()
        }
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a filter directive such as `spire_core=debug`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, spans: FmtSpan) -> Self {
        self.spans = spans;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Sets the file used with [`LogOutput::File`].
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Prints the module path of each record. On by default.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.thread_ids = enabled;
        self
    }

    /// Prints the file and line of each record.
    pub fn with_source_location(mut self, enabled: bool) -> Self {
        self.source_location = enabled;
        self
    }

    /// `RUST_LOG` wins over the configured base level; directives are added
    /// on top. Unparsable directives are skipped.
    fn filter(&self) -> EnvFilter {
        let fallback = self.level.as_str().to_ascii_lowercase();
        let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

        self.directives
            .iter()
            .fold(env, |filter, directive| match directive.parse() {
                Ok(parsed) => filter.add_directive(parsed),
                Err(err) => {
                    eprintln!("spire: ignoring log directive '{directive}': {err}");
                    filter
                }
            })
    }

    fn layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(self.spans.clone())
            .with_target(self.target)
            .with_thread_ids(self.thread_ids)
            .with_file(self.source_location)
            .with_line_number(self.source_location);

        match self.format {
            LogFormat::Full => Box::new(layer),
            LogFormat::Pretty => Box::new(layer.pretty()),
            #[cfg(feature = "json-log")]
            LogFormat::Json => Box::new(layer.json()),
            // Json without the feature degrades to compact.
            _ => Box::new(layer.compact()),
        }
    }

    /// Installs the subscriber, ignoring an already installed one.
    pub fn init(self) -> LoggingGuard {
        self.try_init().unwrap_or_default()
    }

    /// Installs the subscriber.
    pub fn try_init(self) -> Result<LoggingGuard, TryInitError> {
        let (layer, worker) = match (self.output, self.file_path.as_deref()) {
            (LogOutput::Stderr, _) => (self.layer(std::io::stderr), None),
            (LogOutput::File, Some(path)) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let name = path.file_name().unwrap_or_else(|| OsStr::new("spire.log"));
                let (writer, worker) =
                    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
                (self.layer(writer), Some(worker))
            }
            (LogOutput::File, None) => {
                eprintln!("spire: file logging requested without a file path, using stdout");
                (self.layer(std::io::stdout), None)
            }
            (LogOutput::Stdout, _) => (self.layer(std::io::stdout), None),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(self.filter())
            .try_init()?;

        Ok(LoggingGuard { _worker: worker })
    }
}
