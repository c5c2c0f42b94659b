//! ---
//! tsim_section: "01-core-functionality"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Layered TOML configuration for telesim processes."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_catalog_path() -> PathBuf {
    PathBuf::from("target/telesim/catalog.db")
}

fn default_batch_size() -> usize {
    10
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_backoff() -> Duration {
    Duration::from_millis(250)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_jitter() -> Duration {
    Duration::from_millis(50)
}

fn default_random_seed() -> u64 {
    0x7E1E_5EED
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_id() -> String {
    "telesim".to_string()
}

fn default_mqtt_topic_prefix() -> String {
    "telesim".to_string()
}

fn default_mqtt_keep_alive() -> Duration {
    Duration::from_secs(30)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}

/// Primary configuration object for the telesim runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "TELESIM_CONFIG";

    /// Load configuration from disk, respecting the `TELESIM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.catalog.validate()?;
        self.engine.validate()?;
        self.sink.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Storage backend holding the device/sensor catalog and container run state.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CatalogBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub backend: CatalogBackend,
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
    /// Seed the default option set when the catalog is opened.
    #[serde(default = "CatalogConfig::default_seed_options")]
    pub seed_options: bool,
}

impl CatalogConfig {
    const fn default_seed_options() -> bool {
        true
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend == CatalogBackend::Sqlite && self.path.as_os_str().is_empty() {
            return Err(anyhow!("catalog.path must be set for the sqlite backend"));
        }
        Ok(())
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: CatalogBackend::default(),
            path: default_catalog_path(),
            seed_options: true,
        }
    }
}

/// Batching and delivery parameters for the scenario engine.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Messages buffered per device before a batch is submitted.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on how long a partially filled batch may wait.
    #[serde(default = "default_flush_interval", rename = "flush_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub flush_interval: Duration,
    /// Total send attempts per batch, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_backoff", rename = "base_backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_backoff: Duration,
    #[serde(default = "default_max_backoff", rename = "max_backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_backoff: Duration,
    #[serde(default = "default_backoff_jitter", rename = "backoff_jitter_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub backoff_jitter: Duration,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("engine.batch_size must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("engine.max_attempts must be at least 1"));
        }
        if self.flush_interval.is_zero() {
            return Err(anyhow!("engine.flush_interval_ms must be positive"));
        }
        if self.max_backoff < self.base_backoff {
            return Err(anyhow!(
                "engine.max_backoff_ms must not be smaller than engine.base_backoff_ms"
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            max_attempts: default_max_attempts(),
            base_backoff: default_base_backoff(),
            max_backoff: default_max_backoff(),
            backoff_jitter: default_backoff_jitter(),
            random_seed: default_random_seed(),
        }
    }
}

/// Which telemetry sink adapter the daemon wires into the engine.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Log,
    Http,
    Mqtt,
    Memory,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
    /// Gateway ingestion endpoint for the http sink. When unset the daemon
    /// falls back to the catalog's `gateway_endpoint` option.
    #[serde(default)]
    pub endpoint: Option<Url>,
    /// Optional bearer token presented to the gateway.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_sink_timeout", rename = "timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.kind == SinkKind::Mqtt {
            self.mqtt.validate()?;
        }
        Ok(())
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            endpoint: None,
            token: None,
            timeout: default_sink_timeout(),
            mqtt: MqttConfig::default(),
        }
    }
}

/// Broker settings for the mqtt sink.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Records are published to `<prefix>/<container>/<device>/<sensor>`.
    #[serde(default = "default_mqtt_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_mqtt_keep_alive", rename = "keep_alive_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keep_alive: Duration,
}

impl MqttConfig {
    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("sink.mqtt.host is required when sink.kind = \"mqtt\""));
        }
        if self.port == 0 {
            return Err(anyhow!("sink.mqtt.port must be non-zero"));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(anyhow!(
                "sink.mqtt.username and sink.mqtt.password must be set together"
            ));
        }
        if self.topic_prefix.trim_matches('/').is_empty() {
            return Err(anyhow!("sink.mqtt.topic_prefix must not be empty"));
        }
        Ok(())
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            username: None,
            password: None,
            topic_prefix: default_mqtt_topic_prefix(),
            keep_alive: default_mqtt_keep_alive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}
