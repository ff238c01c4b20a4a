//! Configuration loading
//!
//! Resolution order, highest priority first:
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables ([`AnalyzerConfig::apply_env`])
//! 3. TOML config file ([`AnalyzerConfig::load`])
//! 4. Built-in defaults
//!
//! # Example TOML
//!
//! ```toml
//! database_path = "/var/lib/echosight/echosight.db"
//! port = 8000
//! source = "kafka"
//!
//! [kafka]
//! broker = "kafka:9092"
//! input_topic = "social-mentions"
//! dead_letter_topic = "social-mentions-dlq"
//!
//! [enrichment]
//! entity_model = "/etc/echosight/gazetteer.toml"
//!
//! [logging]
//! level = "debug"
//! ```

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Topic the analyzer consumes
pub const DEFAULT_INPUT_TOPIC: &str = "social-mentions";

/// Topic reserved for enriched records (declared, not produced to)
pub const DEFAULT_OUTPUT_TOPIC: &str = "analyzed-mentions";

/// Consumer group shared by analyzer instances
pub const DEFAULT_GROUP_ID: &str = "echosight-analyzer";

/// Where mention messages come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Kafka consumer group on the input topic
    Kafka,
    /// Newline-delimited JSON on standard input
    Stdin,
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(Self::Kafka),
            "stdin" => Ok(Self::Stdin),
            other => Err(Error::Config(format!(
                "unknown source '{}' (expected 'kafka' or 'stdin')",
                other
            ))),
        }
    }
}

/// Which entity model to load
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum EntityModelSource {
    /// Gazetteer compiled into the binary
    Builtin,
    /// Entity extraction switched off
    Disabled,
    /// Gazetteer TOML file on disk
    Gazetteer(PathBuf),
}

impl From<String> for EntityModelSource {
    fn from(value: String) -> Self {
        match value.trim() {
            "" | "builtin" => Self::Builtin,
            "disabled" | "none" | "off" => Self::Disabled,
            path => Self::Gazetteer(PathBuf::from(path)),
        }
    }
}

/// Kafka connection and topic settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Bootstrap broker list
    pub broker: String,
    pub input_topic: String,
    /// Reserved for downstream extension; never produced to
    pub output_topic: String,
    pub group_id: String,
    /// "latest" or "earliest"
    pub auto_offset_reset: String,
    /// Failed messages are republished here when set
    pub dead_letter_topic: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            broker: "localhost:9092".to_string(),
            input_topic: DEFAULT_INPUT_TOPIC.to_string(),
            output_topic: DEFAULT_OUTPUT_TOPIC.to_string(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            auto_offset_reset: "latest".to_string(),
            dead_letter_topic: None,
        }
    }
}

/// Analysis model settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub entity_model: EntityModelSource,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            entity_model: EntityModelSource::Builtin,
        }
    }
}

/// Consumer restart policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed runs before giving up; `None` retries forever
    pub max_restarts: Option<u32>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            max_restarts: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete analyzer configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// SQLite store file
    pub database_path: PathBuf,
    pub database_max_connections: u32,
    /// Liveness endpoint bind address
    pub bind_address: String,
    pub port: u16,
    pub source: SourceKind,
    pub kafka: KafkaConfig,
    pub enrichment: EnrichmentConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            database_max_connections: crate::db::DEFAULT_MAX_CONNECTIONS,
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            source: SourceKind::Kafka,
            kafka: KafkaConfig::default(),
            enrichment: EnrichmentConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Parse configuration from TOML text; missing keys take defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from a TOML file
    ///
    /// With an explicit path the file must exist. Without one, the platform
    /// config file (`<config_dir>/echosight/analyzer.toml`) is used if present,
    /// otherwise built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_file() {
                Some(path) if path.exists() => path,
                _ => {
                    info!("No config file found, using built-in defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Override values from environment variables of the current process
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Override values from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ECHOSIGHT_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("ECHOSIGHT_PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid ECHOSIGHT_PORT '{}': {}", port, e)))?;
        }
        if let Some(bind) = lookup("ECHOSIGHT_BIND") {
            self.bind_address = bind;
        }
        if let Some(source) = lookup("ECHOSIGHT_SOURCE") {
            self.source = source.parse()?;
        }
        if let Some(broker) = lookup("KAFKA_BROKER") {
            self.kafka.broker = broker;
        }
        if let Some(topic) = lookup("ECHOSIGHT_INPUT_TOPIC") {
            self.kafka.input_topic = topic;
        }
        if let Some(group) = lookup("ECHOSIGHT_GROUP_ID") {
            self.kafka.group_id = group;
        }
        if let Some(topic) = lookup("ECHOSIGHT_DEAD_LETTER_TOPIC") {
            self.kafka.dead_letter_topic = Some(topic).filter(|t| !t.trim().is_empty());
        }
        if let Some(model) = lookup("ECHOSIGHT_ENTITY_MODEL") {
            self.enrichment.entity_model = EntityModelSource::from(model);
        }
        Ok(())
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config("port must be non-zero".to_string()));
        }
        if self.database_max_connections == 0 {
            return Err(Error::Config("database_max_connections must be at least 1".to_string()));
        }
        if self.kafka.input_topic.trim().is_empty() {
            return Err(Error::Config("kafka.input_topic must not be empty".to_string()));
        }
        if self.source == SourceKind::Kafka && self.kafka.broker.trim().is_empty() {
            return Err(Error::Config("kafka.broker must not be empty".to_string()));
        }
        if !matches!(self.kafka.auto_offset_reset.as_str(), "latest" | "earliest") {
            return Err(Error::Config(format!(
                "kafka.auto_offset_reset must be 'latest' or 'earliest', got '{}'",
                self.kafka.auto_offset_reset
            )));
        }
        if self.supervisor.initial_backoff_ms == 0
            || self.supervisor.initial_backoff_ms > self.supervisor.max_backoff_ms
        {
            return Err(Error::Config(format!(
                "supervisor backoff must satisfy 0 < initial ({}) <= max ({})",
                self.supervisor.initial_backoff_ms, self.supervisor.max_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Platform config file location
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("echosight").join("analyzer.toml"))
}

/// OS-dependent default store location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("echosight"))
        .unwrap_or_else(|| PathBuf::from("./echosight_data"))
        .join("echosight.db")
}
