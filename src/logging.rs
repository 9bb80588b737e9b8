//! Structured logging for the library and the CLI.
//!
//! One `fmt` layer is installed on a `tracing_subscriber` registry. The
//! layer's output style comes from [`OutputFormat`]; everything else
//! (span events, source locations, thread names) is shared between styles.
//! `RUST_LOG` takes precedence over the configured level, and every line
//! carries the thread name so reader-loop output can be told apart from the
//! caller's.
//!
//! ```no_run
//! use ultrasonic_daq::{config::AppConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("rig online");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

use crate::config::AppConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Line style of the log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored; meant for a terminal.
    #[default]
    Pretty,
    /// One line per event, never colored.
    Compact,
    /// Newline-delimited JSON objects for log shippers.
    Json,
}

/// Logging options resolved from [`AppConfig`] or built by hand.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    /// Emit span open/close events.
    pub with_span_events: bool,
    /// Include the source file and line of each event.
    pub with_file_and_line: bool,
    pub with_thread_names: bool,
    /// Colors; only honored by [`OutputFormat::Pretty`].
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// Colors are only ever written by the pretty style.
    fn ansi_enabled(&self) -> bool {
        self.format == OutputFormat::Pretty && self.with_ansi
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level_directive(self.level)))
    }

    /// Build the output layer: shared settings first, then the line style.
    fn output_layer(&self) -> BoxedLayer {
        let shared = fmt::layer()
            .with_span_events(self.span_events())
            .with_file(self.with_file_and_line)
            .with_line_number(self.with_file_and_line)
            .with_thread_names(self.with_thread_names)
            .with_ansi(self.ansi_enabled());

        match self.format {
            OutputFormat::Pretty => shared.pretty().boxed(),
            OutputFormat::Compact => shared.compact().boxed(),
            OutputFormat::Json => shared.json().boxed(),
        }
    }
}

/// Install the global subscriber described by the `[application]` section.
pub fn init_from_config(config: &AppConfig) -> Result<(), String> {
    init(TracingConfig::from_app_config(config)?)
}

/// Install the global subscriber.
///
/// Calling this again after a subscriber is in place (from an earlier call,
/// a test harness or an embedding application) is not an error.
///
/// ```no_run
/// use ultrasonic_daq::logging::{self, OutputFormat, TracingConfig};
/// use tracing::Level;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// logging::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Json))?;
/// # Ok(())
/// # }
/// ```
pub fn init(config: TracingConfig) -> Result<(), String> {
    let layer = config.output_layer().with_filter(config.filter());
    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(already_installed)
}

fn already_installed(err: TryInitError) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        Ok(())
    } else {
        Err(format!("Failed to initialize tracing: {err}"))
    }
}

/// Parse a case-insensitive level name.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    level.trim().parse::<Level>().map_err(|_| {
        format!("Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error")
    })
}

fn level_directive(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}
