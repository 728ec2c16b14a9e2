// src/config.rs
use chrono::Utc;
use chrono::format::{Item, StrftimeItems};
use log::{debug, warn};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ReporterError, Result};

/// Reporter configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReporterConfig {
    /// Base index name, suffixed with the formatted export date
    pub index: String,
    /// strftime pattern for the index suffix
    pub index_date_format: String,
    /// Document key holding the export instant
    pub timestamp_field: String,
    /// Static fields merged into every document
    #[serde(deserialize_with = "deserialize_additional_fields")]
    pub additional_fields: Map<String, Value>,
    /// Timeout forwarded to the connectivity probe
    pub ping_timeout_ms: Option<u64>,
    /// Default export interval in milliseconds
    pub interval_ms: u64,
    /// Delay between connectivity probe attempts in milliseconds
    pub probe_retry_ms: u64,
    /// Failed probes tolerated before the reporter gives up, unbounded when unset
    pub probe_max_attempts: Option<usize>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            index: "metrics".to_string(),
            index_date_format: "%Y.%m".to_string(),
            timestamp_field: "@timestamp".to_string(),
            additional_fields: Map::new(),
            ping_timeout_ms: None,
            interval_ms: 60_000,
            probe_retry_ms: 5_000,
            probe_max_attempts: None,
        }
    }
}

impl ReporterConfig {
    pub fn ping_timeout(&self) -> Option<Duration> {
        self.ping_timeout_ms.map(Duration::from_millis)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.probe_retry_ms)
    }

    /// Check the configuration before a reporter is built from it
    pub fn validate(&self) -> Result<()> {
        if self.index.is_empty() {
            return Err(ReporterError::Config("index must not be empty".to_string()).into());
        }
        if self.timestamp_field.is_empty() {
            return Err(
                ReporterError::Config("timestamp_field must not be empty".to_string()).into(),
            );
        }
        if !formats_cleanly(&self.index_date_format) {
            return Err(ReporterError::Config(format!(
                "invalid index_date_format: {}",
                self.index_date_format
            ))
            .into());
        }
        check_period("interval_ms", self.interval())?;
        check_period("probe_retry_ms", self.probe_retry_delay())?;
        if self.probe_max_attempts == Some(0) {
            return Err(
                ReporterError::Config("probe_max_attempts must be positive".to_string()).into(),
            );
        }
        Ok(())
    }
}

/// Whether a strftime pattern both parses and renders.
/// Some specifiers, `%#z` among them, are parse-only and fail on formatting.
fn formats_cleanly(pattern: &str) -> bool {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return false;
    }
    let mut rendered = String::new();
    write!(rendered, "{}", Utc::now().format(pattern)).is_ok()
}

/// Reject periods a timer cannot be armed with
pub(crate) fn check_period(name: &str, period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(ReporterError::Config(format!("{} must be positive", name)).into());
    }
    if std::time::Instant::now().checked_add(period).is_none() {
        return Err(ReporterError::Config(format!("{} is out of range: {:?}", name, period)).into());
    }
    Ok(())
}

/// Accept additional fields either as a table or as a JSON object string,
/// the latter being the only shape an environment variable can carry
fn deserialize_additional_fields<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Object(fields) => Ok(fields),
        Value::Null => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(fields)) => Ok(fields),
            Ok(_) => Err(D::Error::custom("additional_fields must be a JSON object")),
            Err(e) => Err(D::Error::custom(format!("malformed additional_fields: {}", e))),
        },
        _ => Err(D::Error::custom("additional_fields must be a map")),
    }
}

/// Builder for reporter configuration
pub struct ReporterConfigBuilder {
    config: ReporterConfig,
}

impl ReporterConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ReporterConfig::default(),
        }
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.config.index = index.into();
        self
    }

    pub fn index_date_format(mut self, format: impl Into<String>) -> Self {
        self.config.index_date_format = format.into();
        self
    }

    pub fn timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.config.timestamp_field = field.into();
        self
    }

    /// Add one static field to every document
    pub fn additional_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.additional_fields.insert(key.into(), value.into());
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn probe_retry_delay(mut self, delay: Duration) -> Self {
        self.config.probe_retry_ms = delay.as_millis() as u64;
        self
    }

    pub fn probe_max_attempts(mut self, attempts: usize) -> Self {
        self.config.probe_max_attempts = Some(attempts);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ReporterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ReporterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection settings for an Elasticsearch cluster
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Process-level configuration for a shipping agent
#[derive(Debug, Deserialize, Clone)]
pub struct ShipperConfig {
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Logging level
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path, format picked from the extension
    File(PathBuf),
    /// Environment variables with a prefix
    Environment(String),
    /// TOML string
    Toml(String),
    /// Default configuration
    Defaults,
}

/// Load configuration from the given sources; later sources override earlier ones
pub fn load_config<T>(sources: Vec<ConfigSource>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    let mut builder = config::Config::builder();

    for source in sources {
        match source {
            ConfigSource::File(path) => {
                if !path.exists() {
                    warn!("Configuration file not found: {}", path.display());
                    continue;
                }

                let format = file_format(&path)?;
                debug!("Loading configuration from file: {}", path.display());
                builder = builder.add_source(config::File::from(path).format(format));
            }
            ConfigSource::Environment(prefix) => {
                debug!("Loading configuration from environment with prefix: {}", prefix);
                builder = builder.add_source(
                    config::Environment::with_prefix(&prefix)
                        .separator("__")
                        .try_parsing(true),
                );
            }
            ConfigSource::Toml(toml_str) => {
                debug!("Loading configuration from TOML string");
                builder = builder
                    .add_source(config::File::from_str(&toml_str, config::FileFormat::Toml));
            }
            ConfigSource::Defaults => {
                // defaults come from the Deserialize impls
                debug!("Using default configuration values");
            }
        }
    }

    let config = builder
        .build()
        .map_err(|e| ReporterError::Config(format!("Failed to build configuration: {}", e)))?;

    let result = config.try_deserialize().map_err(|e| {
        ReporterError::Config(format!("Failed to deserialize configuration: {}", e))
    })?;

    debug!("Configuration loaded successfully: {:?}", result);

    Ok(result)
}

fn file_format(path: &Path) -> Result<config::FileFormat> {
    let extension = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => {
            return Err(ReporterError::Config(format!(
                "Configuration file has no extension: {}",
                path.display()
            ))
            .into());
        }
    };

    match extension.as_str() {
        "toml" => Ok(config::FileFormat::Toml),
        "json" => Ok(config::FileFormat::Json),
        "yaml" | "yml" => Ok(config::FileFormat::Yaml),
        format => Err(ReporterError::Config(format!("Unsupported config format: {}", format)).into()),
    }
}

/// Configuration builder over a list of sources
pub struct ConfigBuilder<T: for<'de> Deserialize<'de>> {
    sources: Vec<ConfigSource>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: for<'de> Deserialize<'de> + Debug> ConfigBuilder<T> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources.push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn add_env(mut self, prefix: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Environment(prefix.into()));
        self
    }

    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Toml(toml.into()));
        self
    }

    pub fn use_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    pub fn build(self) -> Result<T> {
        load_config::<T>(self.sources)
    }
}

impl<T: for<'de> Deserialize<'de> + Debug> Default for ConfigBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults() {
        let config = ReporterConfig::default();
        assert_eq!(config.index, "metrics");
        assert_eq!(config.index_date_format, "%Y.%m");
        assert_eq!(config.timestamp_field, "@timestamp");
        assert!(config.additional_fields.is_empty());
        assert_eq!(config.ping_timeout(), None);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.probe_retry_delay(), Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_bad_date_format() {
        for pattern in ["%Y.%", "%Y.%#z"] {
            let err = ReporterConfigBuilder::new()
                .index_date_format(pattern)
                .build()
                .unwrap_err();
            assert!(
                matches!(err.downcast_ref::<ReporterError>(), Some(ReporterError::Config(_))),
                "{} should be rejected",
                pattern
            );
        }
    }

    #[test]
    fn test_builder_rejects_zero_retry_delay() {
        assert!(
            ReporterConfigBuilder::new()
                .probe_retry_delay(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(ReporterConfigBuilder::new().probe_max_attempts(0).build().is_err());
        assert!(ReporterConfigBuilder::new().probe_max_attempts(3).build().is_ok());
    }

    #[test]
    fn test_check_period_bounds() {
        assert!(check_period("interval_ms", Duration::from_secs(60)).is_ok());
        assert!(check_period("interval_ms", Duration::ZERO).is_err());
        assert!(check_period("interval_ms", Duration::MAX).is_err());
    }

    #[test]
    fn test_builder_rejects_empty_index_and_zero_interval() {
        assert!(ReporterConfigBuilder::new().index("").build().is_err());
        assert!(
            ReporterConfigBuilder::new()
                .interval(Duration::ZERO)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_builder_collects_additional_fields() {
        let config = ReporterConfigBuilder::new()
            .additional_field("host", "web-1")
            .additional_field("zone", 3)
            .ping_timeout(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(Value::Object(config.additional_fields), json!({ "host": "web-1", "zone": 3 }));
        assert_eq!(config.ping_timeout_ms, Some(250));
    }

    #[test]
    fn test_load_reporter_config_from_toml_string() {
        let toml_str = r#"
        index = "yo"
        index_date_format = "%Y.%m.%d"
        timestamp_field = "tick"

        [additional_fields]
        env = "prod"
        "#;

        let config = ConfigBuilder::<ReporterConfig>::new()
            .add_toml(toml_str)
            .build()
            .unwrap();

        assert_eq!(config.index, "yo");
        assert_eq!(config.index_date_format, "%Y.%m.%d");
        assert_eq!(config.timestamp_field, "tick");
        assert_eq!(config.additional_fields["env"], json!("prod"));
        assert_eq!(config.interval_ms, 60_000);
    }

    #[test]
    fn test_additional_fields_from_json_string() {
        let toml_str = r#"additional_fields = '{"dc": "eu-1", "shard": 2}'"#;
        let config = ConfigBuilder::<ReporterConfig>::new()
            .add_toml(toml_str)
            .build()
            .unwrap();
        assert_eq!(config.additional_fields["dc"], json!("eu-1"));
        assert_eq!(config.additional_fields["shard"], json!(2));
    }

    #[test]
    fn test_malformed_additional_fields_is_fatal() {
        let toml_str = r#"additional_fields = '{"dc": '"#;
        let result = ConfigBuilder::<ReporterConfig>::new().add_toml(toml_str).build();
        assert!(result.is_err());

        let toml_str = r#"additional_fields = '[1, 2]'"#;
        let result = ConfigBuilder::<ReporterConfig>::new().add_toml(toml_str).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_load_shipper_config_from_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            log_level = "debug"

            [elasticsearch]
            url = "http://localhost:9200"
            username = "elastic"

            [reporter]
            index = "app"
            interval_ms = 10000
            "#
        )
        .unwrap();

        let config = ConfigBuilder::<ShipperConfig>::new()
            .add_file(file.path())
            .build()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.elasticsearch.url, "http://localhost:9200");
        assert_eq!(config.elasticsearch.username.as_deref(), Some("elastic"));
        assert_eq!(config.elasticsearch.password, None);
        assert_eq!(config.elasticsearch.request_timeout_ms, 30_000);
        assert_eq!(config.reporter.index, "app");
        assert_eq!(config.reporter.interval(), Duration::from_secs(10));
        assert_eq!(config.reporter.timestamp_field, "@timestamp");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = Builder::new().suffix(".ini").tempfile().unwrap();
        let result = ConfigBuilder::<ReporterConfig>::new()
            .add_file(file.path())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_later_sources_override_earlier_ones() {
        let config = ConfigBuilder::<ReporterConfig>::new()
            .use_defaults()
            .add_toml(r#"index = "first""#)
            .add_toml(r#"index = "second""#)
            .build()
            .unwrap();
        assert_eq!(config.index, "second");
    }
}
