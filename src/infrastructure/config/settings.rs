use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub web: WebConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
    /// Apply the bundled schema migrations on startup
    #[serde(default)]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

/// Dispatch loop tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    /// Maximum events claimed per transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Sleep between polls when the queue is empty or an error occurred
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attempts after which an event is reported as exhausted (it keeps retrying)
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: i32,
    #[serde(default = "default_base_retry_seconds")]
    pub base_retry_seconds: u64,
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
    /// Number of dispatch loops spawned by this process
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Upper bound for a single broker or transport call
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Topic identifier; empty disables the broker channel
    #[serde(default)]
    pub topic: String,
    /// Split publishes per recipient with message groups and deduplication ids
    #[serde(default)]
    pub fifo: bool,
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,
    #[serde(default = "default_dedup_window_seconds")]
    pub dedup_window_seconds: u64,
    /// Log publishes instead of sending them to Redis
    #[serde(default)]
    pub dry_run: bool,
}

/// Which fabric carries group broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WebTransportKind {
    /// Only connections held by this process
    #[default]
    Local,
    /// Redis pub/sub backplane shared by every instance
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hub_path")]
    pub hub_path: String,
    #[serde(default = "default_broadcast_method")]
    pub broadcast_method: String,
    #[serde(default = "default_group_prefix")]
    pub group_prefix: String,
    /// Only deliver envelopes that declare `channel_tag`
    #[serde(default = "default_true")]
    pub require_channel_tag: bool,
    #[serde(default = "default_channel_tag")]
    pub channel_tag: String,
    /// Concurrent group sends per envelope
    #[serde(default = "default_web_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub transport: WebTransportKind,
    #[serde(default = "default_backplane_channel")]
    pub backplane_channel: String,
    /// Heartbeat interval in seconds (server sends ping)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_batch_size() -> u32 {
    100
}

fn default_poll_interval_ms() -> u64 {
    800
}

fn default_max_retry_attempts() -> i32 {
    10
}

fn default_base_retry_seconds() -> u64 {
    5
}

fn default_max_backoff_seconds() -> u64 {
    300 // 5 minutes
}

fn default_worker_count() -> usize {
    1
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

fn default_stream_max_len() -> usize {
    100_000
}

fn default_dedup_window_seconds() -> u64 {
    300
}

fn default_hub_path() -> String {
    "/hubs/notifications".to_string()
}

fn default_broadcast_method() -> String {
    "notificationReceived".to_string()
}

fn default_group_prefix() -> String {
    "user-".to_string()
}

fn default_true() -> bool {
    true
}

fn default_channel_tag() -> String {
    "web".to_string()
}

fn default_web_max_batch_size() -> usize {
    100
}

fn default_backplane_channel() -> String {
    "relay:web-groups".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "notification-relay".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("redis.url", default_redis_url())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // RELAY__DATABASE__URL, RELAY__OUTBOX__BATCH_SIZE, RELAY__BROKER__TOPIC, ...
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the dispatch loop or the hub cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbox.batch_size == 0 {
            return Err(ConfigError::Message("outbox.batch_size must be positive".into()));
        }
        if self.outbox.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "outbox.poll_interval_ms must be positive".into(),
            ));
        }
        if self.outbox.worker_count == 0 {
            return Err(ConfigError::Message("outbox.worker_count must be positive".into()));
        }
        if !(1..=500).contains(&self.web.max_batch_size) {
            return Err(ConfigError::Message(
                "web.max_batch_size must be between 1 and 500".into(),
            ));
        }
        if self.web.enabled {
            if self.web.group_prefix.is_empty() || self.web.group_prefix.len() > 100 {
                return Err(ConfigError::Message(
                    "web.group_prefix must be 1..=100 characters".into(),
                ));
            }
            if self.web.broadcast_method.is_empty() || self.web.broadcast_method.len() > 100 {
                return Err(ConfigError::Message(
                    "web.broadcast_method must be 1..=100 characters".into(),
                ));
            }
            if !self.web.hub_path.starts_with('/') {
                return Err(ConfigError::Message("web.hub_path must start with '/'".into()));
            }
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn publish_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.publish_timeout_ms)
    }
}

impl BrokerConfig {
    /// The broker channel is active only when a topic is configured.
    pub fn is_enabled(&self) -> bool {
        !self.topic.trim().is_empty()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            base_retry_seconds: default_base_retry_seconds(),
            max_backoff_seconds: default_max_backoff_seconds(),
            worker_count: default_worker_count(),
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            fifo: false,
            stream_max_len: default_stream_max_len(),
            dedup_window_seconds: default_dedup_window_seconds(),
            dry_run: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hub_path: default_hub_path(),
            broadcast_method: default_broadcast_method(),
            group_prefix: default_group_prefix(),
            require_channel_tag: true,
            channel_tag: default_channel_tag(),
            max_batch_size: default_web_max_batch_size(),
            transport: WebTransportKind::default(),
            backplane_channel: default_backplane_channel(),
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
