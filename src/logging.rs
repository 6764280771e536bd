//! Console logging for acquisition runs.
//!
//! Everything the logger prints goes through `tracing`. The operator sees one
//! compact line per accepted sample; `--log-format json` turns the same events
//! into machine-readable records. `RUST_LOG`, when set, takes precedence over
//! the configured level.
//!
//! # Example
//! ```no_run
//! use plant_daq::{config::AcquisitionConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AcquisitionConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(port = %config.port, "logger ready");
//! # Ok(())
//! # }
//! ```

use crate::config::AcquisitionConfig;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, EnvFilter, Layer, Registry,
};

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Multi-line, for debugging the device protocol
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!(
                "Unknown log format '{}' (expected pretty, compact or json)",
                other
            )),
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Rendering
    pub format: OutputFormat,
    /// Colour output (ignored for JSON)
    pub with_ansi: bool,
    /// Print the emitting module, e.g. `plant_daq::session`
    pub with_target: bool,
    /// Print source file and line
    pub with_file_and_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl TracingConfig {
    /// Compact, coloured output at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::Compact,
            with_ansi: true,
            with_target: false,
            with_file_and_line: false,
        }
    }

    /// Settings derived from `log_level` in the acquisition configuration.
    pub fn from_acquisition_config(config: &AcquisitionConfig) -> Result<Self, String> {
        parse_log_level(&config.log_level).map(Self::new)
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colours
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// Show module targets and source locations. Useful when chasing
    /// protocol problems with `--log-format pretty`.
    pub fn verbose_metadata(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self.with_file_and_line = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_ascii_lowercase()))
    }

    fn layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
    {
        let base = fmt::layer()
            .with_target(self.with_target)
            .with_file(self.with_file_and_line)
            .with_line_number(self.with_file_and_line);

        match self.format {
            OutputFormat::Pretty => base.pretty().with_ansi(self.with_ansi).boxed(),
            OutputFormat::Compact => base.compact().with_ansi(self.with_ansi).boxed(),
            OutputFormat::Json => base.json().with_ansi(false).boxed(),
        }
    }
}

/// Installs the global subscriber using the level from `config`.
pub fn init_from_config(config: &AcquisitionConfig) -> Result<(), String> {
    init(TracingConfig::from_acquisition_config(config)?)
}

/// Installs the global subscriber.
///
/// Returns `Ok(())` without changes if a subscriber is already installed.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let subscriber = tracing_subscriber::registry()
        .with(config.layer::<Registry>().with_filter(config.filter()));
    // The only failure is a subscriber installed earlier (tests, embedders).
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global subscriber already installed, keeping it");
    }
    Ok(())
}

/// Parses `trace`, `debug`, `info`, `warn` or `error` (any case).
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    level.trim().parse::<Level>().map_err(|_| {
        format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )
    })
}
