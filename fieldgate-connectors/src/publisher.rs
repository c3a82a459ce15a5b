//! Publisher Loop
//!
//! Consumer side of the update queue. Runs on its own thread:
//!
//! ```text
//! loop {
//!     update = queue.pop()          // blocks; None once ingestion is gone
//!     json   = update.to_json_vec() // outbound shape
//!     connector.send(topic, json)   // failure counted, not retried
//!     for alert in alerter.check(update) {
//!         notifier.notify(alert)    // every notifier, failures counted
//!     }
//! }
//! ```

use fieldgate_core::{EdgeUpdate, UpdateReceiver};
use serde::Serialize;
use thiserror::Error;

use crate::alert::{Alerter, Notifier};
use crate::Connector;

/// Publishing failures for a single update
#[derive(Debug, Error)]
pub enum PublishError {
    /// Update could not be serialized
    #[error("Failed to encode update: {0}")]
    Encode(#[from] serde_json::Error),

    /// Connector refused the update
    #[error("Connector send failed: {0}")]
    Send(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Totals for one publisher run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Updates the connector accepted
    pub published: u64,
    /// Updates that failed to encode or send
    pub failed: u64,
    /// Alerts raised
    pub alerts: u64,
    /// Notifier deliveries that failed
    pub notify_failures: u64,
}

/// Drains updates into a connector and raises alerts
pub struct Publisher<C: Connector> {
    connector: C,
    topic: String,
    alerter: Alerter,
    notifiers: Vec<Box<dyn Notifier>>,
    report: PublishReport,
}

impl<C: Connector> Publisher<C> {
    /// Publisher sending to `topic` through `connector`
    pub fn new(connector: C, topic: impl Into<String>) -> Self {
        Self {
            connector,
            topic: topic.into(),
            alerter: Alerter::default(),
            notifiers: Vec::new(),
            report: PublishReport::default(),
        }
    }

    /// Evaluate `alerter` on every update
    pub fn with_alerter(mut self, alerter: Alerter) -> Self {
        self.alerter = alerter;
        self
    }

    /// Deliver alerts through `notifier` as well
    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    /// Deliver alerts through an already boxed notifier
    pub fn with_boxed_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Connector in use
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Totals so far
    pub fn report(&self) -> PublishReport {
        self.report
    }

    /// Forward one update and raise its alerts
    ///
    /// Alerts are raised even when the send fails; the send outcome is
    /// what gets returned.
    pub fn publish(&mut self, update: &EdgeUpdate) -> Result<(), PublishError> {
        let sent = self.send(update);
        match &sent {
            Ok(()) => self.report.published += 1,
            Err(_) => self.report.failed += 1,
        }

        for alert in self.alerter.check(update) {
            self.report.alerts += 1;
            for notifier in &mut self.notifiers {
                if let Err(e) = notifier.notify(&alert) {
                    self.report.notify_failures += 1;
                    log::warn!("{} notifier failed for alert ({}): {}", notifier.name(), alert, e);
                }
            }
        }

        sent
    }

    fn send(&mut self, update: &EdgeUpdate) -> Result<(), PublishError> {
        let json = update.to_json_vec()?;
        self.connector
            .send(&self.topic, &json)
            .map_err(|e| PublishError::Send(Box::new(e)))?;
        log::debug!("published {}", update);
        Ok(())
    }

    /// Publish until the producer side of the queue is gone
    pub fn run(mut self, receiver: UpdateReceiver) -> PublishReport {
        log::info!("publisher started on topic {}", self.topic);

        for update in receiver.iter() {
            if let Err(e) = self.publish(&update) {
                let device = update.device_id().unwrap_or("-");
                log::warn!("dropping update from {}: {}", device, e);
            }
        }

        log::info!(
            "publisher stopped: {} published, {} failed, {} alerts",
            self.report.published,
            self.report.failed,
            self.report.alerts
        );
        self.report
    }
}
