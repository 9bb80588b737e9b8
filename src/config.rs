//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. Built-in defaults
//! 2. A TOML file (`config/ultrasonic.toml` unless told otherwise)
//! 3. Environment variables prefixed with `ULTRASONIC_DAQ_`, nested keys
//!    separated by `__`
//!
//! The same file also carries the persisted `[devices.<class>]` channel
//! records read by [`TomlSettings`](crate::settings::TomlSettings).
//!
//! # Example
//! ```no_run
//! use ultrasonic_daq::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```
//!
//! Override the window length for one run:
//!
//! ```text
//! ULTRASONIC_DAQ_SAMPLING__WINDOW_MINUTES=30 ultrasonic-daq simulate
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::address::{ChannelAddress, ChannelRecord};
use crate::error::{AppResult, DaqError};
use crate::logging::OutputFormat;
use crate::registry::DeviceClass;
use crate::sampling::window::MAX_POINTS_PER_MINUTE;
use crate::sampling::{AggregatorConfig, WindowDuration};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/ultrasonic.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "ULTRASONIC_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Connector selection
    #[serde(default)]
    pub backend: BackendConfig,
    /// Telemetry downsampling
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Persisted channel records keyed by device class name
    #[serde(default)]
    pub devices: BTreeMap<String, ChannelRecord>,
}

/// Application-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Which connector variant backs a device class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Physical instruments through OS links
    #[default]
    Hardware,
    /// In-memory simulated devices
    Simulated,
}

/// Connector selection, applied when the device registry is constructed.
///
/// ```toml
/// [backend]
/// mode = "hardware"
///
/// [backend.overrides]
/// static_load_network = "simulated"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Mode for every class without an override
    #[serde(default)]
    pub mode: BackendMode,
    /// Per-class overrides keyed by device class name
    #[serde(default)]
    pub overrides: BTreeMap<String, BackendMode>,
}

impl BackendConfig {
    /// Backend mode for `class`.
    ///
    /// Fails if an override key does not name a device class.
    pub fn mode_for(&self, class: DeviceClass) -> AppResult<BackendMode> {
        for (key, mode) in &self.overrides {
            let parsed = key.parse::<DeviceClass>().map_err(DaqError::Configuration)?;
            if parsed == class {
                return Ok(*mode);
            }
        }
        Ok(self.mode)
    }
}

/// Downsampling parameters shared by every tracked quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Raw samples averaged into one point
    #[serde(default = "default_samples_per_point")]
    pub samples_per_point: usize,
    /// Points per minute of window
    #[serde(default = "default_points_per_minute")]
    pub points_per_minute: f64,
    /// Window length in minutes (5, 10, 30 or 60)
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    /// Axis span per quantity; averages are stored modulo this value
    #[serde(default)]
    pub y_wrap: BTreeMap<String, f64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            samples_per_point: default_samples_per_point(),
            points_per_minute: default_points_per_minute(),
            window_minutes: default_window_minutes(),
            y_wrap: BTreeMap::new(),
        }
    }
}

impl SamplingConfig {
    /// Aggregator settings for one quantity (e.g. "amplitude", "stress").
    pub fn aggregator_config(&self, quantity: &str) -> AppResult<AggregatorConfig> {
        let duration = WindowDuration::try_from(self.window_minutes)?;
        Ok(AggregatorConfig {
            samples_per_point: self.samples_per_point,
            points_per_minute: self.points_per_minute,
            duration,
            y_wrap: self.y_wrap.get(quantity).copied(),
        })
    }
}

fn default_name() -> String {
    "Ultrasonic DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_samples_per_point() -> usize {
    5
}

fn default_points_per_minute() -> f64 {
    60.0
}

fn default_window_minutes() -> u32 {
    5
}

impl AppConfig {
    /// Load configuration from the default path and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and the environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.sampling.samples_per_point == 0 {
            return Err(DaqError::Configuration(
                "samples_per_point must be greater than zero".into(),
            ));
        }
        let ppm = self.sampling.points_per_minute;
        if !ppm.is_finite() || ppm <= 0.0 || ppm > MAX_POINTS_PER_MINUTE {
            return Err(DaqError::Configuration(format!(
                "points_per_minute must be in (0, {MAX_POINTS_PER_MINUTE}], got {ppm}"
            )));
        }
        WindowDuration::try_from(self.sampling.window_minutes)?;

        for (quantity, wrap) in &self.sampling.y_wrap {
            if !wrap.is_finite() || *wrap <= 0.0 {
                return Err(DaqError::Configuration(format!(
                    "y_wrap for '{quantity}' must be a positive number, got {wrap}"
                )));
            }
        }

        for class in DeviceClass::ALL {
            self.backend.mode_for(class)?;
        }

        for (key, record) in &self.devices {
            key.parse::<DeviceClass>().map_err(DaqError::Configuration)?;
            ChannelAddress::from_record(record)?;
        }

        Ok(())
    }

    /// Parsed channel addresses from the `[devices]` table.
    pub fn device_addresses(&self) -> AppResult<BTreeMap<DeviceClass, ChannelAddress>> {
        self.devices
            .iter()
            .map(|(key, record)| {
                let class = key.parse::<DeviceClass>().map_err(DaqError::Configuration)?;
                Ok((class, ChannelAddress::from_record(record)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.sampling.samples_per_point, 5);
        assert_eq!(config.sampling.points_per_minute, 60.0);
        assert_eq!(config.sampling.window_minutes, 5);
        assert_eq!(config.backend.mode, BackendMode::Hardware);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_file() {
        let file = write_config(
            r#"
[application]
name = "Rig 2"
log_level = "debug"
log_format = "json"

[backend]
mode = "hardware"

[backend.overrides]
static_load_network = "simulated"

[sampling]
window_minutes = 10
y_wrap = { amplitude = 100.0 }

[devices.ultrasound]
kind = "serial"
port_name = "/dev/ttyUSB0"
baud_rate = "19200"
"#,
        );

        let config = AppConfig::load_from(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.application.name, "Rig 2");
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert_eq!(
            config.backend.mode_for(DeviceClass::StaticLoadNetwork).unwrap(),
            BackendMode::Simulated
        );
        assert_eq!(
            config.backend.mode_for(DeviceClass::Ultrasound).unwrap(),
            BackendMode::Hardware
        );

        let amplitude = config.sampling.aggregator_config("amplitude").unwrap();
        assert_eq!(amplitude.duration, WindowDuration::Ten);
        assert_eq!(amplitude.y_wrap, Some(100.0));
        assert_eq!(config.sampling.aggregator_config("stress").unwrap().y_wrap, None);

        let addresses = config.device_addresses().unwrap();
        assert_eq!(
            addresses[&DeviceClass::Ultrasound].to_string(),
            "/dev/ttyUSB0 @ 19200 8N1"
        );
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_sampling() {
        let mut config = AppConfig::default();
        config.sampling.window_minutes = 15;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sampling.samples_per_point = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sampling.y_wrap.insert("stress".into(), -1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_points_per_minute_rejected() {
        let mut config = AppConfig::default();
        config.sampling.points_per_minute = 1e15;
        assert!(matches!(config.validate(), Err(DaqError::Configuration(_))));

        config.sampling.points_per_minute = MAX_POINTS_PER_MINUTE;
        config.sampling.window_minutes = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_override_class() {
        let mut config = AppConfig::default();
        config
            .backend
            .overrides
            .insert("laser".into(), BackendMode::Simulated);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_device_key() {
        let mut config = AppConfig::default();
        config.devices.insert(
            "oscilloscope".into(),
            ChannelAddress::serial("COM1").to_record(),
        );
        assert!(config.validate().is_err());
    }
}
