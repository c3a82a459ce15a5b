//! MQTT Connector
//!
//! ## Overview
//!
//! Forwards serialized updates to a broker topic using the synchronous
//! `rumqttc` client. The client only enqueues requests; the network event
//! loop runs on a dedicated thread:
//!
//! ```text
//! publisher thread                      mqtt-eventloop thread
//! ┌────────────────┐  try_publish   ┌──────────────────────────┐
//! │ MqttConnector  │ ─────────────► │ Connection::iter()       │ ──► broker
//! │   .send()      │  (bounded)     │  ConnAck → connected     │
//! └────────────────┘                │  error   → reconnecting  │
//!                                   └──────────────────────────┘
//! ```
//!
//! - `send` never blocks: a full request channel fails the send
//! - Connection state and statistics are shared with the event thread
//! - Dropping the connector requests a clean disconnect

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rumqttc::{Client, ClientError, Connection, ConnectionError, Event, MqttOptions, Packet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ConnectionStats, Connector};

/// Pause between reconnect attempts after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// MQTT-specific errors
#[derive(Debug, Error)]
pub enum MqttError {
    /// Request could not be handed to the event loop
    #[error("MQTT client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid settings
    #[error("Invalid MQTT configuration: {0}")]
    Config(String),

    /// Event loop thread could not be started
    #[error("Failed to start MQTT event loop: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Delivery guarantee, numbered as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire and forget
    AtMostOnce,
    /// Acknowledged delivery (may duplicate)
    #[default]
    AtLeastOnce,
    /// Four-way handshake
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {}", other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client identifier presented to the broker
    pub client_id: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Publish QoS
    pub qos: QoS,
    /// Requests that may queue before `send` starts failing
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "fieldgate".into(),
            keep_alive_secs: 30,
            qos: QoS::AtLeastOnce,
            request_capacity: 64,
        }
    }
}

impl MqttConfig {
    /// Settings for `host:port`, defaults otherwise
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the client identifier
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the publish QoS
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Reject settings the broker would refuse
    pub fn validate(&self) -> Result<(), MqttError> {
        if self.host.is_empty() {
            return Err(MqttError::Config("host must not be empty".into()));
        }
        if self.client_id.is_empty() {
            return Err(MqttError::Config("client_id must not be empty".into()));
        }
        // rumqttc rejects keep-alive below 5 seconds
        if self.keep_alive_secs < 5 {
            return Err(MqttError::Config("keep_alive_secs must be at least 5".into()));
        }
        Ok(())
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        options
    }
}

/// State shared with the event loop thread
#[derive(Debug, Default)]
struct Shared {
    connected: AtomicBool,
    stats: Mutex<ConnectionStats>,
}

impl Shared {
    fn stats(&self) -> MutexGuard<'_, ConnectionStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Broker connector
pub struct MqttConnector {
    client: Client,
    qos: QoS,
    shared: Arc<Shared>,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttConnector {
    /// Validate `config` and start the event loop thread
    ///
    /// Returns immediately; the connection is established in the
    /// background and [`is_connected`](Connector::is_connected) flips once
    /// the broker acknowledges it.
    pub fn connect(config: &MqttConfig) -> Result<Self, MqttError> {
        config.validate()?;

        let (client, connection) = Client::new(config.options(), config.request_capacity.max(1));
        let shared = Arc::new(Shared::default());

        let thread_shared = Arc::clone(&shared);
        let broker = format!("{}:{}", config.host, config.port);
        let event_loop = thread::Builder::new()
            .name("mqtt-eventloop".into())
            .spawn(move || drive(connection, &thread_shared, &broker))?;

        log::info!("MQTT connector started for {}:{}", config.host, config.port);

        Ok(Self {
            client,
            qos: config.qos,
            shared,
            event_loop: Some(event_loop),
        })
    }
}

/// Poll the connection until the client side goes away
fn drive(mut connection: Connection, shared: &Shared, broker: &str) {
    let mut was_connected = false;

    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                shared.connected.store(true, Ordering::Release);
                if was_connected {
                    shared.stats().reconnections += 1;
                }
                was_connected = true;
                log::info!("MQTT connected to {}", broker);
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                if shared.connected.swap(false, Ordering::AcqRel) {
                    log::warn!("MQTT connection to {} lost: {}", broker, e);
                } else {
                    log::debug!("MQTT connect to {} failed: {}", broker, e);
                }
                shared.stats().last_error = Some(e.to_string());
                thread::sleep(RECONNECT_DELAY);
            }
        }
    }

    shared.connected.store(false, Ordering::Release);
    log::debug!("MQTT event loop for {} stopped", broker);
}

impl Connector for MqttConnector {
    type Error = MqttError;

    fn send(&mut self, topic: &str, data: &[u8]) -> Result<(), Self::Error> {
        match self.client.try_publish(topic, self.qos.into(), false, data.to_vec()) {
            Ok(()) => {
                self.shared.stats().record_sent(data.len());
                Ok(())
            }
            Err(e) => {
                self.shared.stats().record_failure(&e);
                Err(e.into())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn stats(&self) -> ConnectionStats {
        self.shared.stats().clone()
    }
}

impl Drop for MqttConnector {
    fn drop(&mut self) {
        if let Err(e) = self.client.disconnect() {
            log::debug!("MQTT disconnect request failed: {}", e);
        }
        // Detached: the thread may be parked in a reconnect delay
        drop(self.event_loop.take());
    }
}
