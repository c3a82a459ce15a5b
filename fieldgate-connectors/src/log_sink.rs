//! Log connector
//!
//! Writes every update to the log at `info`, one line per update. The
//! default publisher when no broker is configured.

use std::convert::Infallible;

use crate::{ConnectionStats, Connector};

/// Connector whose sink is the process log
#[derive(Debug, Default)]
pub struct LogConnector {
    stats: ConnectionStats,
}

impl LogConnector {
    /// Create a new log connector
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for LogConnector {
    type Error = Infallible;

    fn send(&mut self, topic: &str, data: &[u8]) -> Result<(), Self::Error> {
        log::info!("{} {}", topic, String::from_utf8_lossy(data));
        self.stats.record_sent(data.len());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }
}
