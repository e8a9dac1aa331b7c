//! Broker configuration with validation.
//!
//! Loaded from a TOML file, every section and field falling back to
//! defaults, with a handful of CLI overrides applied on top in `main`.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main broker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub firehose: FirehoseConfig,
    pub subscriptions: SubscriptionsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(path.as_ref().display().to_string(), e))?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == self.server.metrics_port {
            return Err(ConfigError::DuplicatePorts(self.server.port));
        }
        if self.subscriptions.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "subscriptions.max_connections cannot be 0".into(),
            ));
        }
        if self.subscriptions.write_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "subscriptions.write_timeout cannot be 0".into(),
            ));
        }
        if self.subscriptions.pong_wait.is_zero() {
            return Err(ConfigError::Invalid(
                "subscriptions.pong_wait cannot be 0".into(),
            ));
        }
        if !self.firehose.url.starts_with("ws://") && !self.firehose.url.starts_with("wss://") {
            return Err(ConfigError::Invalid(format!(
                "firehose.url must be a ws:// or wss:// URL, got {}",
                self.firehose.url
            )));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {:?}, got {}",
                valid_levels, self.logging.level
            )));
        }
        Ok(())
    }

    /// API + WebSocket listener address.
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    /// Metrics listener address.
    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.metrics_host, self.server.metrics_port)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the API + WebSocket listener.
    pub host: IpAddr,
    /// Port (default: 8080).
    pub port: u16,
    /// Bind address for the metrics listener.
    pub metrics_host: IpAddr,
    /// Metrics port (default: 9090).
    pub metrics_port: u16,
    /// Drain window for graceful shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            metrics_host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            metrics_port: 9090,
            shutdown_timeout: Duration::from_secs(10),
            cors: CorsConfig::default(),
        }
    }
}

/// CORS configuration for the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_all_origins: bool,
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_all_origins: true,
            allowed_origins: Vec::new(),
        }
    }
}

/// Upstream firehose configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirehoseConfig {
    /// Enable the ingest task. Disable to run the broker API-only.
    pub enabled: bool,
    /// JSON event-stream endpoint.
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Consecutive failed connections before giving up. 0 = retry forever.
    pub max_reconnects: u32,
    /// The connection is considered dead when no frame arrives within this window.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "wss://jetstream2.us-east.bsky.network/subscribe".to_string(),
            reconnect_delay: Duration::from_secs(5),
            max_reconnects: 10,
            read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Subscription registry and subscriber-socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionsConfig {
    /// Fleet-wide connection cap.
    pub max_connections: usize,
    /// Per-write deadline on subscriber sockets.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// A subscriber is dropped when no pong arrives within this window.
    /// Server pings go out every 9/10 of it.
    #[serde(with = "humantime_serde")]
    pub pong_wait: Duration,
    /// Maximum inbound client message size in bytes.
    pub max_message_size: usize,
    /// How often the reaper scans for idle filters.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// How long a filter may sit without connections before the reaper
    /// deletes it.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            write_timeout: Duration::from_secs(30),
            pong_wait: Duration::from_secs(60),
            max_message_size: 512,
            cleanup_interval: Duration::from_secs(5 * 60),
            grace_period: Duration::from_secs(10 * 60),
        }
    }
}

impl SubscriptionsConfig {
    /// Server→client ping period: 9/10 of the pong wait.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait.mul_f64(0.9)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, #[source] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("API and metrics listeners share port {0}")]
    DuplicatePorts(u16),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration fields ("30s", "5m", "250ms").
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
