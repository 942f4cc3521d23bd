//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Packet capture settings.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Device enrichment settings.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Subscriber delivery settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Packet capture configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Interface to capture on. When unset, one is picked automatically.
    #[serde(default)]
    pub interface: Option<String>,

    /// UDP destination ports that identify an IP report.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Maximum bytes captured per frame.
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,

    /// Whether to capture in promiscuous mode.
    #[serde(default = "default_true")]
    pub promiscuous: bool,
}

/// Configuration for fetching device details from detected senders.
#[derive(Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// Whether enrichment runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Destination port whose senders are enriched.
    #[serde(default = "default_enrich_port")]
    pub port: u16,

    /// Port of the device's HTTP API.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Path of the stats endpoint on the device.
    #[serde(default = "default_stats_path")]
    pub path: String,

    /// Digest auth username.
    #[serde(default = "default_credential")]
    pub username: String,

    /// Digest auth password.
    #[serde(default = "default_credential")]
    pub password: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_enrich_timeout_ms")]
    pub timeout_ms: u64,
}

/// Subscriber delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// How long a publish waits on one subscriber before evicting it.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Events buffered per subscriber before delivery has to wait.
    ///
    /// A subscriber that stops reading still accepts this many events before
    /// the next delivery times out and evicts it.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reporter_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    7070
}

fn default_ports() -> Vec<u16> {
    reporter_types::DEFAULT_REPORT_PORTS.to_vec()
}

fn default_snaplen() -> i32 {
    1600
}

fn default_true() -> bool {
    true
}

fn default_enrich_port() -> u16 {
    reporter_types::ANTMINER_PORT
}

fn default_http_port() -> u16 {
    80
}

fn default_stats_path() -> String {
    "/cgi-bin/stats.cgi".to_string()
}

fn default_credential() -> String {
    "root".to_string()
}

fn default_enrich_timeout_ms() -> u64 {
    5000
}

fn default_delivery_timeout_ms() -> u64 {
    1000
}

fn default_subscriber_buffer() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            ports: default_ports(),
            snaplen: default_snaplen(),
            promiscuous: true,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_enrich_port(),
            http_port: default_http_port(),
            path: default_stats_path(),
            username: default_credential(),
            password: default_credential(),
            timeout_ms: default_enrich_timeout_ms(),
        }
    }
}

impl fmt::Debug for EnrichmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichmentConfig")
            .field("enabled", &self.enabled)
            .field("port", &self.port)
            .field("http_port", &self.http_port)
            .field("path", &self.path)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: default_delivery_timeout_ms(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl BroadcastConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `REPORTER_HOST` overrides `server.host`
/// - `REPORTER_PORT` overrides `server.port`
/// - `REPORTER_INTERFACE` overrides `capture.interface`
/// - `REPORTER_LOG_LEVEL` overrides `logging.level`
/// - `REPORTER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting values are unusable.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("REPORTER_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("REPORTER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(interface) = std::env::var("REPORTER_INTERFACE") {
        if !interface.trim().is_empty() {
            config.capture.interface = Some(interface);
        }
    }
    if let Ok(level) = std::env::var("REPORTER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("REPORTER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.capture.ports.is_empty() {
        return Err(ConfigError::Invalid(
            "capture.ports must list at least one port".to_string(),
        ));
    }
    if config.broadcast.subscriber_buffer == 0 {
        return Err(ConfigError::Invalid(
            "broadcast.subscriber_buffer must be at least 1".to_string(),
        ));
    }
    if !config.enrichment.path.starts_with('/') {
        return Err(ConfigError::Invalid(format!(
            "enrichment.path must start with '/': {}",
            config.enrichment.path
        )));
    }
    Ok(())
}
