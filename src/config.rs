//! Engine configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`EngineConfig::default`])
//! 2. A TOML file
//! 3. Environment variables prefixed with `JUNGFRAU_`, with `__` separating
//!    nested keys
//!
//! # Environment Variable Overrides
//!
//! ```text
//! JUNGFRAU_LOGGING__LEVEL=debug
//! JUNGFRAU_POLLING__TEMPERATURE_PERIOD=2s
//! JUNGFRAU_DISCOVERY__SENSOR_PREFIX=Temp
//! ```
//!
//! # Example
//!
//! ```toml
//! [logging]
//! level = "info"
//! json = false
//!
//! [polling]
//! default_period = "200ms"
//! temperature_period = "1s"
//! state_period = "200ms"
//!
//! [discovery]
//! sensor_prefix = "Temperature"
//! temperature_command = "temperature"
//!
//! [events]
//! event_command = "temp_event"
//! reset_command = "temp_event_clear"
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AppResult, DaqError};

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Log output settings
    pub logging: LoggingConfig,
    /// Refresh cadence
    pub polling: PollingConfig,
    /// Dynamic attribute discovery
    pub discovery: DiscoveryConfig,
    /// Over-heat event handling
    pub events: EventsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Update periods for the static and discovered attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Period for ordinary detector attributes
    #[serde(with = "humantime_serde")]
    pub default_period: Duration,
    /// Period for the per-module temperature attributes
    #[serde(with = "humantime_serde")]
    pub temperature_period: Duration,
    /// Period for the acquisition state (`status`, `frames_left`)
    #[serde(with = "humantime_serde")]
    pub state_period: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_period: Duration::from_millis(200),
            temperature_period: Duration::from_secs(1),
            state_period: Duration::from_millis(200),
        }
    }
}

/// Dynamic discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Leading part of every generated attribute name
    pub sensor_prefix: String,
    /// Hardware command returning per-module sensor arrays
    pub temperature_command: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            sensor_prefix: "Temperature".to_string(),
            temperature_command: "temperature".to_string(),
        }
    }
}

/// Over-heat event commands. The event flag is only ever cleared by hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Property holding the latched event code
    pub event_command: String,
    /// Command that clears the latch
    pub reset_command: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            event_command: "temp_event".to_string(),
            reset_command: "temp_event_clear".to_string(),
        }
    }
}

impl EngineConfig {
    /// Figment with defaults, then `path`, then environment overrides.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("JUNGFRAU_").split("__"))
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::from_figment(Self::figment(path))
    }

    /// Extract and validate from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> AppResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`DaqError::Configuration`] with a descriptive message for any
    /// validation failure.
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            )));
        }

        let periods = [
            ("default_period", self.polling.default_period),
            ("temperature_period", self.polling.temperature_period),
            ("state_period", self.polling.state_period),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(DaqError::Configuration(format!(
                    "polling.{} must be greater than zero",
                    name
                )));
            }
        }

        if self.discovery.temperature_command.is_empty() {
            return Err(DaqError::Configuration(
                "discovery.temperature_command must not be empty".into(),
            ));
        }
        if self.events.event_command.is_empty() || self.events.reset_command.is_empty() {
            return Err(DaqError::Configuration(
                "events commands must not be empty".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling.default_period, Duration::from_millis(200));
        assert_eq!(config.polling.temperature_period, Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
level = "debug"

[polling]
temperature_period = "2s 500ms"

[discovery]
sensor_prefix = "Temp"
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.polling.temperature_period, Duration::from_millis(2500));
        assert_eq!(config.polling.default_period, Duration::from_millis(200));
        assert_eq!(config.discovery.sensor_prefix, "Temp");
        assert_eq!(config.events, EventsConfig::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = EngineConfig::default();
        config.logging.level = "verbose".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log level"));
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[polling]\ndefault_period = \"0s\"").unwrap();

        let err = EngineConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("default_period"));
    }

    #[test]
    fn test_malformed_duration_is_load_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[polling]\nstate_period = \"soon\"").unwrap();

        assert!(matches!(
            EngineConfig::load_from(file.path()),
            Err(DaqError::Config(_))
        ));
    }
}
