//! Threshold Alerting
//!
//! Rules are evaluated against every published update:
//!
//! ```toml
//! [[alerts.rules]]
//! reading = "soil_temp"
//! min = 2.0          # frost risk
//!
//! [[alerts.rules]]
//! reading = "air_humidity"
//! max = 90.0
//! ```
//!
//! A rule fires when the reading is present and strictly below `min` or
//! strictly above `max`. An absent reading never alerts. Each alert is
//! handed to every configured [`Notifier`].

use core::fmt;

use fieldgate_core::{EdgeUpdate, Epoch, Reading};
use serde::{Deserialize, Serialize};

use crate::ConnectorError;

/// One threshold rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Reading the rule watches
    pub reading: Reading,
    /// Alert when the value drops below this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Alert when the value rises above this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl AlertRule {
    /// Rule firing below `min`
    pub fn below(reading: Reading, min: f64) -> Self {
        Self { reading, min: Some(min), max: None }
    }

    /// Rule firing above `max`
    pub fn above(reading: Reading, max: f64) -> Self {
        Self { reading, min: None, max: Some(max) }
    }

    /// Whether the rule names at least one bound
    pub fn is_bounded(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// Which bound `value` breaks, if any
    pub fn breach(&self, value: f64) -> Option<Bound> {
        match (self.min, self.max) {
            (Some(min), _) if value < min => Some(Bound::Below(min)),
            (_, Some(max)) if value > max => Some(Bound::Above(max)),
            _ => None,
        }
    }
}

/// Broken threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "bound", content = "limit", rename_all = "snake_case")]
pub enum Bound {
    /// Value under the minimum
    Below(f64),
    /// Value over the maximum
    Above(f64),
}

/// A fired rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Device the update came from
    pub device_id: Option<String>,
    /// Origin timestamp of the update
    pub timestamp: Option<Epoch>,
    /// Reading that tripped
    pub reading: Reading,
    /// Reported value
    pub value: f64,
    /// Threshold broken
    #[serde(flatten)]
    pub bound: Bound,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = self.device_id.as_deref().unwrap_or("unknown device");
        let (relation, limit) = match self.bound {
            Bound::Below(limit) => ("below", limit),
            Bound::Above(limit) => ("above", limit),
        };
        write!(
            f,
            "{}: {} {}{} {} {}{}",
            device,
            self.reading.label(),
            self.value,
            self.reading.unit(),
            relation,
            limit,
            self.reading.unit()
        )
    }
}

/// Rule set evaluated per update
#[derive(Debug, Clone, Default)]
pub struct Alerter {
    rules: Vec<AlertRule>,
}

impl Alerter {
    /// Alerter for `rules`; rules without a bound are ignored
    pub fn new(rules: impl IntoIterator<Item = AlertRule>) -> Self {
        Self {
            rules: rules.into_iter().filter(AlertRule::is_bounded).collect(),
        }
    }

    /// Active rules
    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Every alert `update` triggers, in rule order
    pub fn check(&self, update: &EdgeUpdate) -> Vec<Alert> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let value = update.reading(rule.reading)?;
                let bound = rule.breach(value)?;
                Some(Alert {
                    device_id: update.device_id().map(str::to_owned),
                    timestamp: update.timestamp().cloned(),
                    reading: rule.reading,
                    value,
                    bound,
                })
            })
            .collect()
    }
}

/// Alert delivery channel
pub trait Notifier: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Deliver one alert
    fn notify(&mut self, alert: &Alert) -> Result<(), ConnectorError>;
}

/// Notifier that logs alerts at `warn`
#[derive(Debug, Default)]
pub struct LogNotifier {
    delivered: u64,
}

impl LogNotifier {
    /// Create a new log notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts logged so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&mut self, alert: &Alert) -> Result<(), ConnectorError> {
        log::warn!("ALERT {}", alert);
        self.delivered += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(json: &str) -> EdgeUpdate {
        EdgeUpdate::from_json(json.as_bytes()).unwrap()
    }

    #[test]
    fn fires_outside_bounds_only() {
        let rule = AlertRule { reading: Reading::AirTemp, min: Some(0.0), max: Some(35.0) };
        assert_eq!(rule.breach(-0.5), Some(Bound::Below(0.0)));
        assert_eq!(rule.breach(0.0), None);
        assert_eq!(rule.breach(35.0), None);
        assert_eq!(rule.breach(35.1), Some(Bound::Above(35.0)));
    }

    #[test]
    fn absent_reading_never_alerts() {
        let alerter = Alerter::new([AlertRule::above(Reading::AirHumidity, 90.0)]);
        assert!(alerter.check(&update(r#"{"uuid":"x","temp":50}"#)).is_empty());
    }

    #[test]
    fn alerts_carry_update_identity() {
        let alerter = Alerter::new([
            AlertRule::below(Reading::SoilTemp, 2.0),
            AlertRule::above(Reading::AirHumidity, 90.0),
        ]);
        let alerts = alerter.check(&update(r#"{"uuid":"n7","epoch":99,"temp":1.5,"dhtH":95}"#));

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].device_id.as_deref(), Some("n7"));
        assert_eq!(alerts[0].bound, Bound::Below(2.0));
        assert_eq!(alerts[1].reading, Reading::AirHumidity);
        assert_eq!(alerts[1].to_string(), "n7: Air Humidity 95% above 90%");
    }

    #[test]
    fn unbounded_rules_dropped() {
        let alerter = Alerter::new([AlertRule { reading: Reading::AirTemp, min: None, max: None }]);
        assert!(alerter.rules().is_empty());
    }

    #[test]
    fn alert_json_shape() {
        let alerter = Alerter::new([AlertRule::below(Reading::SoilTemp, 2.0)]);
        let alert = &alerter.check(&update(r#"{"uuid":"n7","epoch":99,"temp":1.5}"#))[0];

        assert_eq!(
            serde_json::to_value(alert).unwrap(),
            json!({
                "device_id": "n7",
                "timestamp": 99,
                "reading": "soil_temp",
                "value": 1.5,
                "bound": "below",
                "limit": 2.0
            })
        );
    }

    #[test]
    fn rules_from_toml_shape() {
        let rule: AlertRule = serde_json::from_value(json!({"reading": "air_temp", "max": 40.0})).unwrap();
        assert_eq!(rule, AlertRule::above(Reading::AirTemp, 40.0));
    }

    #[test]
    fn log_notifier_counts() {
        let mut notifier = LogNotifier::new();
        let alerter = Alerter::new([AlertRule::above(Reading::AirTemp, 30.0)]);
        for alert in alerter.check(&update(r#"{"dhtT":31}"#)) {
            notifier.notify(&alert).unwrap();
        }
        assert_eq!(notifier.delivered(), 1);
        assert_eq!(notifier.name(), "log");
    }
}
