//! Downstream Connectors for FieldGate
//!
//! ## Overview
//!
//! Everything that happens *after* an update leaves the ingestion loop runs
//! on the publisher thread and lives here:
//!
//! ```text
//! UpdateReceiver ──► Publisher ──► Connector::send(topic, json)
//!                        │
//!                        └──► Alerter::check ──► Notifier::notify (per alert)
//! ```
//!
//! ## Connector Selection Guide
//!
//! | Connector          | Feature | Use                                             |
//! |--------------------|---------|-------------------------------------------------|
//! | [`LogConnector`]   | always  | development, or when the log is the sink        |
//! | `MqttConnector`    | `mqtt`  | forward to a broker topic (default)             |
//! | `WebhookNotifier`  | `http`  | alert delivery to an HTTP endpoint              |
//!
//! ### MQTT
//!
//! **Characteristics:**
//! - Persistent connection, reconnects on the next poll after a failure
//! - QoS 0/1/2 selectable, default 1 (at least once)
//! - Publishes never block the publisher: a full request channel is a
//!   failed send, counted in [`ConnectionStats`]
//!
//! ### HTTP webhooks
//!
//! **Characteristics:**
//! - JSON `POST` per alert
//! - Bearer or basic authentication
//! - Bounded retries with exponential backoff on 5xx, 429 and transport errors
//!
//! ## Failure Model
//!
//! A connector failure never stops the publisher. Failed sends are counted
//! and logged; the update is not retried. Nodes resend readings on their own
//! schedule, so a lost update is replaced by the next one.
//!
//! ## Example Usage
//!
//! ```rust
//! use fieldgate_connectors::{LogConnector, Publisher};
//! use fieldgate_core::{update_queue, EdgeUpdate, QueueConfig};
//!
//! let (tx, rx) = update_queue(QueueConfig::unbounded());
//! tx.push(EdgeUpdate::from_json(br#"{"uuid":"x","temp":21.5}"#).unwrap()).unwrap();
//! drop(tx);
//!
//! let report = Publisher::new(LogConnector::new(), "/hello_world").run(rx);
//! assert_eq!(report.published, 1);
//! ```

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "http")]
pub mod http;

pub mod alert;
pub mod log_sink;
pub mod publisher;

// Re-export common types
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttConnector, MqttError, QoS};

#[cfg(feature = "http")]
pub use http::{AuthMethod, HttpError, WebhookConfig, WebhookNotifier};

pub use alert::{Alert, AlertRule, Alerter, Bound, LogNotifier, Notifier};
pub use log_sink::LogConnector;
pub use publisher::{PublishError, PublishReport, Publisher};

use thiserror::Error;

/// Common connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// No live connection to the downstream service
    #[error("Not connected")]
    NotConnected,

    /// Outbound buffer is full
    #[error("Buffer full")]
    BufferFull,

    /// Protocol-level failure
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Invalid connector settings
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// MQTT failure
    #[cfg(feature = "mqtt")]
    #[error(transparent)]
    Mqtt(#[from] MqttError),

    /// HTTP failure
    #[cfg(feature = "http")]
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Trait for all downstream connectors
pub trait Connector: Send {
    /// Connector-specific failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send one serialized update
    fn send(&mut self, topic: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Get connection statistics
    fn stats(&self) -> ConnectionStats;
}

/// Connection statistics common to all connectors
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total messages sent successfully
    pub messages_sent: u64,
    /// Total messages failed to send
    pub messages_failed: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Number of reconnections
    pub reconnections: u32,
    /// Last error message
    pub last_error: Option<String>,
}

impl ConnectionStats {
    /// Record a successful send of `bytes`
    pub fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record a failed send
    pub fn record_failure(&mut self, error: impl ToString) {
        self.messages_failed += 1;
        self.last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_last_error() {
        let mut stats = ConnectionStats::default();
        stats.record_sent(10);
        stats.record_sent(5);
        stats.record_failure("broker unreachable");

        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 15);
        assert_eq!(stats.messages_failed, 1);
        assert_eq!(stats.last_error.as_deref(), Some("broker unreachable"));
    }
}
