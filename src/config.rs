use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::Duration;

/// Property holding the log level filter (overridden by `RUST_LOG`)
pub const LOG_LEVEL: &str = "otel.log.level";
/// Property selecting the log output format (`pretty` or `json`)
pub const LOG_FORMAT: &str = "otel.log.format";
/// Property holding the service name
pub const SERVICE_NAME: &str = "otel.service.name";

/// Source of environment variables.
pub trait Environment: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }
}

/// A fixed snapshot, mostly useful in tests
impl Environment for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Pipeline configuration properties (`otel.*`, `google.cloud.*`, ...).
///
/// Keys are kept sorted so that iteration and `Debug` output are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigProperties {
    values: BTreeMap<String, String>,
}

impl ConfigProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns `None` for missing or unparseable values.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// Reads a duration expressed in milliseconds.
    pub fn get_millis(&self, key: &str) -> Option<Duration> {
        self.get(key)?.trim().parse().ok().map(Duration::from_millis)
    }

    /// Parses a `k1=v1,k2=v2` list. Malformed entries are skipped.
    pub fn get_map(&self, key: &str) -> HashMap<String, String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .filter_map(|pair| {
                        let (k, v) = pair.split_once('=')?;
                        let k = k.trim();
                        (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for ConfigProperties {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty human-readable format with colors (for local dev)
    #[default]
    Pretty,
    /// JSON with `severity` at the root, as Cloud Logging expects
    Json,
}

/// Settings for the global `tracing` subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub service_name: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: env!("CARGO_PKG_NAME").to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    pub fn from_properties(properties: &ConfigProperties) -> Self {
        let defaults = Self::default();
        let log_format = match properties.get(LOG_FORMAT) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self {
            service_name: properties
                .get(SERVICE_NAME)
                .map(str::to_string)
                .unwrap_or(defaults.service_name),
            log_level: properties
                .get(LOG_LEVEL)
                .map(str::to_string)
                .unwrap_or(defaults.log_level),
            log_format,
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}
