//! Collector configuration
//!
//! Loaded from a TOML file; every section and key is optional. Command-line
//! flags are applied on top by the binary, then the result is validated once
//! before anything binds.
//!
//! ```toml
//! [listen]
//! address = "0.0.0.0:8000"
//! transport = "datagram"        # or "stream"
//!
//! [sessions]
//! idle_timeout_minutes = 1
//! shared_secret = "share"       # or "exclusive"
//!
//! [queue]
//! capacity = 10000
//! overflow = "drop_oldest"
//!
//! [publisher]
//! kind = "mqtt"
//! topic = "/hello_world"
//!
//! [publisher.mqtt]
//! host = "broker.local"
//! ```

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fieldgate_connectors::{AlertRule, MqttConfig};
use fieldgate_core::{
    IdleThreshold, QueueConfig, ReadingRanges, SegmentMode, SharedSecretPolicy,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::dispatch::{UnknownPeerPolicy, ValidationMode};

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that was requested
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        /// File that was parsed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of its allowed range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted key, e.g. `listen.address`
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Defaults could not be rendered
    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Socket transport class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// UDP, header-framed datagrams
    #[default]
    Datagram,
    /// TCP, CRLF-delimited segments
    Stream,
}

/// Top-level collector configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Listening socket
    pub listen: ListenConfig,
    /// Session registry behaviour
    pub sessions: SessionConfig,
    /// Update queue shape
    pub queue: QueueConfig,
    /// Reading plausibility checks
    pub validation: ValidationConfig,
    /// Downstream publishing
    pub publisher: PublisherConfig,
    /// Threshold alerts
    pub alerts: AlertsConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Listening socket configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Bind address
    ///
    /// Examples:
    /// - `0.0.0.0:8000` - all interfaces
    /// - `127.0.0.1:0` - loopback, ephemeral port
    pub address: String,
    /// Datagram or stream
    pub transport: TransportKind,
    /// Stream segment interpretation
    pub stream_messages: SegmentMode,
    /// `SO_RCVTIMEO` on the bound socket, 0 disables
    pub receive_timeout_secs: u64,
    /// Upper bound on one readiness wait
    pub poll_interval_ms: u64,
    /// Stream mode: concurrent connections before new ones are refused
    pub max_connections: usize,
    /// Stream mode: unread reply bytes before a connection is dropped
    pub max_pending_reply_bytes: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8000".into(),
            transport: TransportKind::Datagram,
            stream_messages: SegmentMode::Tagged,
            receive_timeout_secs: 5,
            poll_interval_ms: 1000,
            max_connections: 1024,
            max_pending_reply_bytes: 64 * 1024,
        }
    }
}

impl ListenConfig {
    /// Parsed bind address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address
            .parse()
            .map_err(|e| ConfigError::invalid("listen.address", format!("{:?}: {}", self.address, e)))
    }

    /// Receive timeout, `None` when disabled
    pub fn receive_timeout(&self) -> Option<Duration> {
        (self.receive_timeout_secs > 0).then(|| Duration::from_secs(self.receive_timeout_secs))
    }

    /// Readiness wait bound
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Session registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whole minutes of silence before a session is evicted
    pub idle_timeout_minutes: u64,
    /// Fixed identity namespace; absent = random per run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Uuid>,
    /// Same secret on two peers
    pub shared_secret: SharedSecretPolicy,
    /// Data from peers that never said Hello
    pub unknown_peer: UnknownPeerPolicy,
    /// Use the session's id when a Data payload has no `uuid`
    pub fill_device_id: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 1,
            namespace: None,
            shared_secret: SharedSecretPolicy::Share,
            unknown_peer: UnknownPeerPolicy::Drop,
            fill_device_id: false,
        }
    }
}

impl SessionConfig {
    /// Eviction threshold
    pub fn idle_threshold(&self) -> IdleThreshold {
        IdleThreshold::from_minutes(self.idle_timeout_minutes)
    }
}

/// Validation configuration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// What to do with implausible readings
    pub mode: ValidationMode,
    /// Plausible range per reading
    #[serde(flatten)]
    pub ranges: ReadingRanges,
}

/// Downstream sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherKind {
    /// Log every update
    #[default]
    Log,
    /// Publish to an MQTT broker
    Mqtt,
}

/// Publisher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Sink
    pub kind: PublisherKind,
    /// Outbound topic
    pub topic: String,
    /// Broker settings, used when `kind = "mqtt"`
    pub mqtt: MqttConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            kind: PublisherKind::Log,
            topic: "/hello_world".into(),
            mqtt: MqttConfig::default(),
        }
    }
}

/// Alerting configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Threshold rules
    pub rules: Vec<AlertRule>,
    /// Optional webhook delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookSettings>,
}

/// Webhook delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Endpoint URL
    pub url: String,
    /// Sent as `Authorization: Bearer ...`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    /// Per-request timeout
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
    /// Retries after the first attempt
    #[serde(default = "default_webhook_retries")]
    pub max_retries: u32,
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_webhook_retries() -> u32 {
    3
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl CollectorConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use fieldgate_collector::config::CollectorConfig;
    ///
    /// let config = CollectorConfig::from_file("fieldgate.toml")?;
    /// # Ok::<(), fieldgate_collector::config::ConfigError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every value before anything binds
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.socket_addr()?;

        if self.listen.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("listen.poll_interval_ms", "must be at least 1"));
        }
        if self.listen.max_connections == 0 {
            return Err(ConfigError::invalid("listen.max_connections", "must be at least 1"));
        }
        if self.listen.max_pending_reply_bytes == 0 {
            return Err(ConfigError::invalid(
                "listen.max_pending_reply_bytes",
                "must be at least 1",
            ));
        }
        if self.sessions.idle_timeout_minutes == 0 {
            return Err(ConfigError::invalid(
                "sessions.idle_timeout_minutes",
                "must be at least 1 (eviction has whole-minute granularity)",
            ));
        }
        if self.queue.capacity == Some(0) {
            return Err(ConfigError::invalid("queue.capacity", "must be at least 1 when set"));
        }

        for (name, range) in [
            ("validation.soil_temp", self.validation.ranges.soil_temp),
            ("validation.air_temp", self.validation.ranges.air_temp),
            ("validation.air_humidity", self.validation.ranges.air_humidity),
        ] {
            if !range.is_ordered() {
                return Err(ConfigError::invalid(
                    name,
                    format!("min {} must be below max {}", range.min, range.max),
                ));
            }
        }

        if self.publisher.topic.is_empty() {
            return Err(ConfigError::invalid("publisher.topic", "must not be empty"));
        }
        if self.publisher.kind == PublisherKind::Mqtt {
            self.publisher
                .mqtt
                .validate()
                .map_err(|e| ConfigError::invalid("publisher.mqtt", e.to_string()))?;
        }

        for (i, rule) in self.alerts.rules.iter().enumerate() {
            if !rule.is_bounded() {
                return Err(ConfigError::invalid(
                    format!("alerts.rules[{}]", i),
                    "needs at least one of min or max",
                ));
            }
        }
        if let Some(webhook) = &self.alerts.webhook {
            if !webhook.url.starts_with("http://") && !webhook.url.starts_with("https://") {
                return Err(ConfigError::invalid(
                    "alerts.webhook.url",
                    "must start with http:// or https://",
                ));
            }
        }

        Ok(())
    }
}
