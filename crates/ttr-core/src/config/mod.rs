//! Configuration loading, environment overrides, and validation.
//!
//! Precedence, highest first: environment variable → config file → built-in
//! default. Core keys map to `TTR_*` variables; nested provider/sink settings
//! map to `PROVIDERS_<N>_SETTINGS_<KEY>` / `SINKS_<N>_SETTINGS_<KEY>` with N
//! the zero-based index. Validation failures abort startup and name the
//! offending key.

mod vars;

pub use vars::{interpolate, InterpolationResult};

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::info;

use crate::error::{ConfigError, ReadFileSnafu, YamlParseSnafu};

const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_BACKFILL_WINDOW: Duration = Duration::from_secs(168 * 60 * 60);
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_HEALTH_PORT: u16 = 8080;
const DEFAULT_METRICS_PORT: u16 = 9090;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ttr: TtrConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// Core service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtrConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_poll_interval", with = "duration_string")]
    pub poll_interval: Duration,
    #[serde(default = "default_backfill_window", with = "duration_string")]
    pub backfill_window: Duration,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for TtrConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            backfill_window: DEFAULT_BACKFILL_WINDOW,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            health_port: DEFAULT_HEALTH_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

/// One provider entry; implementations are resolved by `name` at wiring time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

/// One sink entry; implementations are resolved by `name` at wiring time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

impl Config {
    /// Load a config file, interpolate `${VAR}` references, apply environment
    /// overrides, and validate.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu {
            path: path.to_string(),
        })?;
        Self::parse(&contents)
    }

    /// Parse a YAML document through the same pipeline as [`Config::load`].
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate(contents);
        if !interpolated.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: interpolated.errors.join("\n"),
            });
        }

        let mut config: Config =
            serde_yaml::from_str(&interpolated.text).context(YamlParseSnafu)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TTR_*` and nested settings overrides from the environment.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var("TTR_TIMEZONE") {
            self.ttr.timezone = value;
        }
        if let Ok(value) = env::var("TTR_LOG_LEVEL") {
            self.ttr.log_level = value;
        }
        if let Ok(value) = env::var("TTR_POLL_INTERVAL") {
            self.ttr.poll_interval =
                parse_duration(&value).ok_or_else(|| ConfigError::InvalidDuration {
                    key: "TTR_POLL_INTERVAL".to_string(),
                    value: value.clone(),
                })?;
        }
        if let Ok(value) = env::var("TTR_BACKFILL_WINDOW") {
            self.ttr.backfill_window =
                parse_duration(&value).ok_or_else(|| ConfigError::InvalidDuration {
                    key: "TTR_BACKFILL_WINDOW".to_string(),
                    value: value.clone(),
                })?;
        }
        if let Ok(value) = env::var("TTR_HEALTH_PORT") {
            if let Ok(port) = value.parse() {
                self.ttr.health_port = port;
            }
        }
        if let Ok(value) = env::var("TTR_METRICS_PORT") {
            if let Ok(port) = value.parse() {
                self.ttr.metrics_port = port;
            }
        }

        for (index, provider) in self.providers.iter_mut().enumerate() {
            apply_settings_overrides(&mut provider.settings, &format!("PROVIDERS_{index}_SETTINGS_"));
        }
        for (index, sink) in self.sinks.iter_mut().enumerate() {
            apply_settings_overrides(&mut sink.settings, &format!("SINKS_{index}_SETTINGS_"));
        }

        Ok(())
    }

    /// Validate the effective configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttr.poll_interval < Duration::from_secs(60) {
            return Err(ConfigError::PollIntervalTooShort);
        }
        if self.ttr.backfill_window < Duration::from_secs(3600) {
            return Err(ConfigError::BackfillWindowTooShort);
        }
        if !matches!(self.ttr.log_level.as_str(), "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::InvalidLogLevel {
                level: self.ttr.log_level.clone(),
            });
        }
        if !self.providers.iter().any(|p| p.enabled) {
            return Err(ConfigError::NoEnabledProvider);
        }
        if !self.sinks.iter().any(|s| s.enabled) {
            return Err(ConfigError::NoEnabledSink);
        }
        Ok(())
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    pub fn enabled_sinks(&self) -> impl Iterator<Item = &SinkConfig> {
        self.sinks.iter().filter(|s| s.enabled)
    }

    /// Log the effective configuration with sensitive settings redacted.
    pub fn log_effective(&self) {
        info!(
            timezone = %self.ttr.timezone,
            poll_interval = ?self.ttr.poll_interval,
            backfill_window = ?self.ttr.backfill_window,
            log_level = %self.ttr.log_level,
            health_port = self.ttr.health_port,
            metrics_port = self.ttr.metrics_port,
            "effective core configuration"
        );

        for provider in &self.providers {
            info!(
                provider = %provider.name,
                enabled = provider.enabled,
                settings = %redacted_settings(&provider.settings),
                "provider configuration"
            );
        }
        for sink in &self.sinks {
            info!(
                sink = %sink.name,
                enabled = sink.enabled,
                settings = %redacted_settings(&sink.settings),
                "sink configuration"
            );
        }
    }
}

/// Fetch a string-valued setting.
pub fn setting_str<'a>(
    settings: &'a HashMap<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    settings.get(key).and_then(|v| v.as_str())
}

/// Fetch a bool-valued setting.
pub fn setting_bool(settings: &HashMap<String, serde_json::Value>, key: &str) -> Option<bool> {
    settings.get(key).and_then(|v| v.as_bool())
}

fn apply_settings_overrides(settings: &mut HashMap<String, serde_json::Value>, prefix: &str) {
    for (name, value) in env::vars() {
        if let Some(rest) = name.strip_prefix(prefix) {
            if rest.is_empty() || value.is_empty() {
                continue;
            }
            settings.insert(
                rest.to_lowercase(),
                serde_json::Value::String(value),
            );
        }
    }
}

/// Whether a settings key holds a secret that must never be logged.
pub fn is_sensitive_key(key: &str) -> bool {
    const SENSITIVE: [&str; 5] = ["key", "token", "password", "secret", "credential"];
    let lower = key.to_lowercase();
    SENSITIVE.iter().any(|s| lower.contains(s))
}

fn redacted_settings(settings: &HashMap<String, serde_json::Value>) -> String {
    let mut entries: Vec<String> = settings
        .iter()
        .map(|(key, value)| {
            if is_sensitive_key(key) {
                format!("{key}=[REDACTED]")
            } else {
                format!("{key}={value}")
            }
        })
        .collect();
    entries.sort();
    entries.join(" ")
}

/// Parse a Go-style duration string: one or more `<integer><unit>` segments
/// with units `ms`, `s`, `m`, `h` (e.g. `30s`, `5m`, `168h`, `1h30m`).
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = input;

    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 {
            return None;
        }
        let (digits, after) = rest.split_at(digits_end);
        let value: u64 = digits.parse().ok()?;

        let (unit, remainder) = if let Some(r) = after.strip_prefix("ms") {
            (Duration::from_millis(value), r)
        } else if let Some(r) = after.strip_prefix('s') {
            (Duration::from_secs(value), r)
        } else if let Some(r) = after.strip_prefix('m') {
            (Duration::from_secs(value * 60), r)
        } else if let Some(r) = after.strip_prefix('h') {
            (Duration::from_secs(value * 3600), r)
        } else {
            return None;
        };

        total += unit;
        rest = remainder;
    }

    Some(total)
}

/// Serde bridge between `Duration` fields and duration strings in YAML.
mod duration_string {
    use super::parse_duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}s", value.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid duration {raw:?}")))
    }
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_backfill_window() -> Duration {
    DEFAULT_BACKFILL_WINDOW
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_health_port() -> u16 {
    DEFAULT_HEALTH_PORT
}

fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}
