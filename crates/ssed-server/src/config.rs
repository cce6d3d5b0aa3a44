//! Server configuration.
//!
//! Configuration is layered, lowest precedence first:
//! - Built-in defaults
//! - TOML configuration file (`ssed.toml`, `/etc/ssed/ssed.toml`,
//!   `~/.config/ssed/ssed.toml`, or `--config <path>`)
//! - Environment variables (`SSED_PORT`, `SSED_BROKER__SUBSCRIBER_CAPACITY`, ...)
//! - Command line flags, applied by `main`

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use ssed_core::{BrokerConfig, SlowSubscriberPolicy, DEFAULT_MAX_MESSAGE_SIZE};
use ssed_transport::HandlerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SSED";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Where broadcast messages come from.
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Event stream configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Broker queues.
    #[serde(default)]
    pub broker: BrokerSettings,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Producer mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerMode {
    /// Read standard input passively, one message per line.
    #[default]
    Stream,
    /// Interactive prompt showing the subscriber count.
    Prompt,
}

/// Producer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProducerConfig {
    #[serde(default)]
    pub mode: ProducerMode,
}

/// Event stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path of the event stream endpoint.
    #[serde(default = "default_events_path")]
    pub events_path: String,

    /// Encoded events that may wait for the HTTP writer per connection.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Reconnection delay hint sent to clients, in milliseconds.
    #[serde(default)]
    pub retry_ms: Option<u64>,
}

/// Broker queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Capacity of the publish intake.
    #[serde(default = "default_queue_capacity")]
    pub publish_capacity: usize,

    /// Capacity of each subscriber queue.
    #[serde(default = "default_queue_capacity")]
    pub subscriber_capacity: usize,

    /// What to do with subscribers whose queue is full.
    #[serde(default)]
    pub slow_subscriber: SlowSubscriberPolicy,

    /// Largest message payload accepted, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keep-alive comment interval in milliseconds; 0 disables heartbeats.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_events_path() -> String {
    "/".to_string()
}

fn default_buffer_size() -> usize {
    16
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_heartbeat_interval() -> u64 {
    15_000 // 15 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            producer: ProducerConfig::default(),
            transport: TransportConfig::default(),
            broker: BrokerSettings::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            events_path: default_events_path(),
            buffer_size: default_buffer_size(),
            retry_ms: None,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            publish_capacity: default_queue_capacity(),
            subscriber_capacity: default_queue_capacity(),
            slow_subscriber: SlowSubscriberPolicy::default(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    let config_paths = [
        "ssed.toml",
        "/etc/ssed/ssed.toml",
        "~/.config/ssed/ssed.toml",
    ];

    config_paths
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}

impl Config {
    /// Load configuration from a file and the environment.
    ///
    /// With `path` set, that file must exist; otherwise the default
    /// locations are searched and defaults are used if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or a value cannot be
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map(Path::to_path_buf).or_else(find_config_file);

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            builder = builder.add_source(
                config::File::from(file.as_path())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let source = match &file {
            Some(file) => file.display().to_string(),
            None => "defaults".to_string(),
        };
        builder
            .build()
            .and_then(config::Config::try_deserialize)
            .with_context(|| format!("Failed to load configuration from {source}"))
    }

    /// Override host and port from a `host:port` string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string has no port or the port is invalid.
    pub fn set_listen(&mut self, listen: &str) -> Result<()> {
        let (host, port) = listen
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("Listen address {listen:?} is missing a port"))?;
        self.port = port
            .parse()
            .with_context(|| format!("Invalid port in listen address {listen:?}"))?;
        if !host.is_empty() {
            self.host = host.to_string();
        }
        Ok(())
    }

    /// Get the `host:port` address to bind to.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Broker settings in the form the broker takes.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            publish_capacity: self.broker.publish_capacity,
            subscriber_capacity: self.broker.subscriber_capacity,
            slow_subscriber: self.broker.slow_subscriber,
            max_message_size: self.broker.max_message_size,
        }
    }

    /// Per-connection settings for the connection handler.
    #[must_use]
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            heartbeat_interval: (self.heartbeat.interval_ms > 0)
                .then(|| Duration::from_millis(self.heartbeat.interval_ms)),
            retry: self.transport.retry_ms.map(Duration::from_millis),
        }
    }
}
