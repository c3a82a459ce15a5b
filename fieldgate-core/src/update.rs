//! Sensor Updates
//!
//! ## Inbound
//!
//! A `Data` payload is a JSON object. Recognized keys:
//!
//! | Key    | Field          | Type             |
//! |--------|----------------|------------------|
//! | `uuid` | `device_id`    | string           |
//! | `epoch`| `timestamp`    | number or string |
//! | `temp` | `soil_temp`    | number           |
//! | `dhtT` | `air_temp`     | number           |
//! | `dhtH` | `air_humidity` | number           |
//!
//! Unknown keys are ignored and missing keys become `None`. A recognized key
//! with the wrong type rejects the whole payload; nothing is half-decoded.
//!
//! ## Outbound
//!
//! ```json
//! {"uuid":"x","timestamp":1000,"data":{"soil":{"temp":21.5},"air":{"temp":19.0,"humidity":40.0}}}
//! ```
//!
//! `uuid` and `timestamp` are always written (as `null` when unknown); every
//! other absent field is omitted, and `data` disappears when both groups are empty.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;

/// Origin-reported timestamp, kept exactly as the node sent it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Epoch {
    /// Numeric epoch (seconds or milliseconds, node's choice)
    Number(serde_json::Number),
    /// Textual timestamp
    Text(String),
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Epoch::Number(n) => write!(f, "{}", n),
            Epoch::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for Epoch {
    fn from(value: u64) -> Self {
        Epoch::Number(value.into())
    }
}

/// The readings a node can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    /// Soil probe temperature (`temp`)
    SoilTemp,
    /// DHT air temperature (`dhtT`)
    AirTemp,
    /// DHT relative humidity (`dhtH`)
    AirHumidity,
}

impl Reading {
    /// Every reading, in display order
    pub const ALL: [Reading; 3] = [Reading::SoilTemp, Reading::AirTemp, Reading::AirHumidity];

    /// Configuration name
    pub const fn name(self) -> &'static str {
        match self {
            Reading::SoilTemp => "soil_temp",
            Reading::AirTemp => "air_temp",
            Reading::AirHumidity => "air_humidity",
        }
    }

    /// Human-readable label
    pub const fn label(self) -> &'static str {
        match self {
            Reading::SoilTemp => "Soil Temp",
            Reading::AirTemp => "Air Temp",
            Reading::AirHumidity => "Air Humidity",
        }
    }

    /// Unit suffix
    pub const fn unit(self) -> &'static str {
        match self {
            Reading::SoilTemp | Reading::AirTemp => "°C",
            Reading::AirHumidity => "%",
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire shape of a `Data` payload
#[derive(Deserialize)]
struct WireUpdate {
    uuid: Option<String>,
    epoch: Option<Epoch>,
    temp: Option<f64>,
    #[serde(rename = "dhtT")]
    dht_temp: Option<f64>,
    #[serde(rename = "dhtH")]
    dht_humidity: Option<f64>,
}

/// One set of readings from one node, immutable once decoded
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EdgeUpdate {
    device_id: Option<String>,
    timestamp: Option<Epoch>,
    soil_temp: Option<f64>,
    air_temp: Option<f64>,
    air_humidity: Option<f64>,
}

impl EdgeUpdate {
    /// Update with no readings yet
    pub fn new(device_id: Option<String>, timestamp: Option<Epoch>) -> Self {
        Self {
            device_id: device_id.filter(|id| !id.is_empty()),
            timestamp,
            ..Self::default()
        }
    }

    /// Decode a `Data` payload
    pub fn from_json(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(payload)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }

        let wire: WireUpdate = serde_json::from_value(value)?;
        Ok(Self {
            device_id: wire.uuid.filter(|id| !id.is_empty()),
            timestamp: wire.epoch,
            soil_temp: wire.temp,
            air_temp: wire.dht_temp,
            air_humidity: wire.dht_humidity,
        })
    }

    /// Set one reading
    pub fn with_reading(mut self, reading: Reading, value: f64) -> Self {
        *self.slot(reading) = Some(value);
        self
    }

    /// Replace the device id (used when the payload carried none)
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        self.device_id = Some(device_id).filter(|id| !id.is_empty());
        self
    }

    fn slot(&mut self, reading: Reading) -> &mut Option<f64> {
        match reading {
            Reading::SoilTemp => &mut self.soil_temp,
            Reading::AirTemp => &mut self.air_temp,
            Reading::AirHumidity => &mut self.air_humidity,
        }
    }

    /// Device id from the payload, if any
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Origin timestamp, if any
    pub fn timestamp(&self) -> Option<&Epoch> {
        self.timestamp.as_ref()
    }

    /// Soil temperature in °C
    pub fn soil_temp(&self) -> Option<f64> {
        self.soil_temp
    }

    /// Air temperature in °C
    pub fn air_temp(&self) -> Option<f64> {
        self.air_temp
    }

    /// Relative air humidity in %
    pub fn air_humidity(&self) -> Option<f64> {
        self.air_humidity
    }

    /// Look up a reading by name
    pub fn reading(&self, reading: Reading) -> Option<f64> {
        match reading {
            Reading::SoilTemp => self.soil_temp,
            Reading::AirTemp => self.air_temp,
            Reading::AirHumidity => self.air_humidity,
        }
    }

    /// Every present reading
    pub fn readings(&self) -> impl Iterator<Item = (Reading, f64)> + '_ {
        Reading::ALL
            .into_iter()
            .filter_map(move |r| self.reading(r).map(|v| (r, v)))
    }

    /// Outbound document
    pub fn to_published(&self) -> PublishedUpdate {
        let soil = ReadingGroup {
            temp: self.soil_temp,
            humidity: None,
        };
        let air = ReadingGroup {
            temp: self.air_temp,
            humidity: self.air_humidity,
        };

        PublishedUpdate {
            uuid: self.device_id.clone(),
            timestamp: self.timestamp.clone(),
            data: PublishedData {
                soil: Some(soil).filter(|g| !g.is_empty()),
                air: Some(air).filter(|g| !g.is_empty()),
            },
        }
    }

    /// Outbound document as JSON bytes
    pub fn to_json_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_published())
    }
}

impl fmt::Display for EdgeUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.timestamp {
            Some(ts) => write!(f, "[{}]", ts)?,
            None => f.write_str("[-]")?,
        }
        for (reading, value) in self.readings() {
            write!(f, " {}:{}{}", reading.label(), value, reading.unit())?;
        }
        Ok(())
    }
}

/// Downstream wire document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedUpdate {
    /// Device id, `null` when unknown
    pub uuid: Option<String>,
    /// Origin timestamp, `null` when unknown
    pub timestamp: Option<Epoch>,
    /// Grouped readings
    #[serde(default, skip_serializing_if = "PublishedData::is_empty")]
    pub data: PublishedData,
}

/// Readings grouped by probe location
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PublishedData {
    /// Soil probe group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil: Option<ReadingGroup>,
    /// Air sensor group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air: Option<ReadingGroup>,
}

impl PublishedData {
    /// No group carries a reading
    pub fn is_empty(&self) -> bool {
        self.soil.is_none() && self.air.is_none()
    }
}

/// Temperature and humidity at one location
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadingGroup {
    /// Temperature in °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    /// Relative humidity in %
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

impl ReadingGroup {
    fn is_empty(&self) -> bool {
        self.temp.is_none() && self.humidity.is_none()
    }
}
