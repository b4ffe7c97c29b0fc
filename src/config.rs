use crate::constants;
use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Every recognized setting, with defaults. Loaded once at startup and
/// validated before anything touches the network.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` list.
    pub bootstrap_servers: String,
    pub topic_prefix: String,
    pub producer_acks: String,
    pub producer_retries: u32,
    pub message_timeout_ms: u64,
    pub key_by_station_id: bool,
    pub consumer_group_id: String,
    pub auto_offset_reset: OffsetReset,
    pub auto_commit_interval_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: constants::DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            topic_prefix: constants::DEFAULT_TOPIC_PREFIX.to_string(),
            producer_acks: "all".to_string(),
            producer_retries: 3,
            message_timeout_ms: 30_000,
            key_by_station_id: false,
            consumer_group_id: constants::DEFAULT_CONSUMER_GROUP.to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            auto_commit_interval_ms: 1_000,
        }
    }
}

/// Where a consumer group without committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl FromStr for OffsetReset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(format!("expected 'earliest' or 'latest', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub user_agent: String,
    pub auth: AuthConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: constants::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_secs: 5,
            user_agent: constants::DEFAULT_USER_AGENT.to_string(),
            auth: AuthConfig::None,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Credentials attached to every feed request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        value: String,
    },
}

fn default_api_key_header() -> String {
    constants::DEFAULT_API_KEY_HEADER.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
            file_prefix: "bikeshare_pipeline.log".to_string(),
        }
    }
}

/// Prometheus scrape endpoint. Off unless asked for.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9898".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub execution_interval_secs: u64,
    /// Runs longer than this are reported as overruns. Zero disables the check.
    pub max_execution_time_secs: u64,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            execution_interval_secs: 60,
            max_execution_time_secs: 300,
            batch_size: 100,
        }
    }
}

impl PipelineConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.execution_interval_secs)
    }

    pub fn max_execution_time(&self) -> Option<Duration> {
        (self.max_execution_time_secs > 0).then(|| Duration::from_secs(self.max_execution_time_secs))
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const ACKS: [&str; 4] = ["all", "-1", "0", "1"];

impl Config {
    /// Defaults, then the TOML file (if any), then the process environment.
    /// The result is not yet validated; callers apply CLI overrides first.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(constants::DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override settings from environment variables, resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("KAFKA_BOOTSTRAP_SERVERS") {
            self.kafka.bootstrap_servers = v;
        }
        if let Some(v) = get("KAFKA_TOPIC_PREFIX") {
            self.kafka.topic_prefix = v;
        }
        if let Some(v) = get("KAFKA_PRODUCER_RETRIES") {
            self.kafka.producer_retries = parse_env("KAFKA_PRODUCER_RETRIES", &v)?;
        }
        if let Some(v) = get("KAFKA_CONSUMER_GROUP_ID") {
            self.kafka.consumer_group_id = v;
        }
        if let Some(v) = get("KAFKA_AUTO_OFFSET_RESET") {
            self.kafka.auto_offset_reset = parse_env("KAFKA_AUTO_OFFSET_RESET", &v)?;
        }

        if let Some(v) = get("API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = get("API_TIMEOUT") {
            self.api.timeout_secs = parse_env("API_TIMEOUT", &v)?;
        }
        if let Some(v) = get("API_MAX_RETRIES") {
            self.api.max_retries = parse_env("API_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("API_RETRY_DELAY") {
            self.api.retry_delay_secs = parse_env("API_RETRY_DELAY", &v)?;
        }
        if let Some(token) = get("API_BEARER_TOKEN") {
            self.api.auth = AuthConfig::Bearer { token };
        } else if let Some(value) = get("API_KEY") {
            let header = get("API_KEY_HEADER").unwrap_or_else(default_api_key_header);
            self.api.auth = AuthConfig::ApiKey { header, value };
        } else if let (Some(username), Some(password)) = (get("API_USERNAME"), get("API_PASSWORD")) {
            self.api.auth = AuthConfig::Basic { username, password };
        }

        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("LOG_DIR") {
            self.logging.directory = v;
        }

        if let Some(v) = get("PIPELINE_INTERVAL") {
            self.pipeline.execution_interval_secs = parse_env("PIPELINE_INTERVAL", &v)?;
        }
        if let Some(v) = get("PIPELINE_BATCH_SIZE") {
            self.pipeline.batch_size = parse_env("PIPELINE_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("METRICS_ENABLED") {
            self.metrics.enabled = parse_env("METRICS_ENABLED", &v)?;
        }
        if let Some(v) = get("METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let servers_empty = self
            .kafka
            .bootstrap_servers
            .split(',')
            .all(|s| s.trim().is_empty());
        if servers_empty {
            return Err(invalid("kafka.bootstrap_servers cannot be empty"));
        }
        if self.kafka.topic_prefix.trim().is_empty() {
            return Err(invalid("kafka.topic_prefix cannot be empty"));
        }
        if !ACKS.contains(&self.kafka.producer_acks.as_str()) {
            return Err(invalid(format!(
                "kafka.producer_acks must be one of {ACKS:?}, got '{}'",
                self.kafka.producer_acks
            )));
        }
        if self.kafka.consumer_group_id.trim().is_empty() {
            return Err(invalid("kafka.consumer_group_id cannot be empty"));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(invalid("api.base_url cannot be empty"));
        }
        if self.api.timeout_secs == 0 {
            return Err(invalid("api.timeout_secs must be positive"));
        }
        if self.pipeline.execution_interval_secs == 0 {
            return Err(invalid("pipeline.execution_interval_secs must be positive"));
        }
        if self.pipeline.batch_size == 0 {
            return Err(invalid("pipeline.batch_size must be positive"));
        }
        if self.metrics.enabled && self.metrics.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(format!(
                "metrics.listen_addr must be a socket address, got '{}'",
                self.metrics.listen_addr
            )));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging.level must be one of {LOG_LEVELS:?}, got '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }

    pub fn topic_for(&self, kind: crate::types::FeedKind) -> String {
        kind.topic(&self.kafka.topic_prefix)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Env {
        name: name.to_string(),
        message: format!("'{raw}': {e}"),
    })
}
