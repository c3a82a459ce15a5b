//! Collector errors
//!
//! Only startup and the readiness poll can fail the collector. Everything that
//! goes wrong with a single peer is logged and absorbed by the engine.

use std::io;
use std::net::SocketAddr;

use fieldgate_connectors::{HttpError, MqttError};
use thiserror::Error;

use crate::config::ConfigError;

/// Collector result
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Fatal collector failures
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listening socket could not be set up
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Requested address
        address: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Readiness poll failed
    #[error("Readiness poll failed: {0}")]
    Poll(#[source] io::Error),

    /// Other I/O failure during setup
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Broker connection could not be set up
    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    /// Webhook notifier could not be set up
    #[error("Webhook error: {0}")]
    Webhook(#[from] HttpError),

    /// Publisher thread could not be started
    #[error("Failed to start publisher thread: {0}")]
    Spawn(#[source] io::Error),

    /// Publisher thread panicked
    #[error("Publisher thread panicked")]
    PublisherPanicked,

    /// Shutdown handler could not be installed
    #[error("Failed to install shutdown handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
