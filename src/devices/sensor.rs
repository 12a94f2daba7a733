//! Sensors: proximity switches and level probes.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DeviceError;

/// Sensor kind and its current physical reading.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SensorKind {
    /// Detects a bottle within the detection range.
    Proximity { detected: bool },
    /// Fill level in percent.
    Level { level: f64 },
}

/// Value carried by a sensor event.
///
/// Serialized untagged: `true` / `false` for proximity, a number for level.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Detected(bool),
    Level(f64),
}

impl SensorValue {
    /// Extracts a value from a loosely shaped payload.
    ///
    /// Accepts a bare bool/number, or an object carrying `value`,
    /// `detected` or `level`.
    pub fn from_json(payload: &Value) -> Option<Self> {
        match payload {
            Value::Bool(b) => Some(SensorValue::Detected(*b)),
            Value::Number(n) => n.as_f64().map(SensorValue::Level),
            Value::Object(map) => ["value", "detected", "level"]
                .iter()
                .find_map(|key| map.get(*key))
                .and_then(SensorValue::from_json),
            _ => None,
        }
    }

    /// Proximity reading, if this is one.
    pub fn detected(&self) -> Option<bool> {
        match self {
            SensorValue::Detected(d) => Some(*d),
            SensorValue::Level(_) => None,
        }
    }

    /// Level reading, if this is one.
    pub fn level(&self) -> Option<f64> {
        match self {
            SensorValue::Level(l) => Some(*l),
            SensorValue::Detected(_) => None,
        }
    }
}

/// Timestamped snapshot of a sensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    pub position: f64,
    pub value: SensorValue,
    pub timestamp: SystemTime,
}

/// A sensor mounted on the line.
#[derive(Clone, Debug)]
pub struct Sensor {
    id: String,
    position: f64,
    register: u16,
    kind: SensorKind,
    last_update: Option<SystemTime>,
}

impl Sensor {
    /// Proximity sensor, initially clear.
    pub fn proximity(id: impl Into<String>, position: f64, register: u16) -> Self {
        Self::with_kind(id, position, register, SensorKind::Proximity { detected: false })
    }

    /// Level sensor, initially empty.
    pub fn level(id: impl Into<String>, position: f64, register: u16) -> Self {
        Self::with_kind(id, position, register, SensorKind::Level { level: 0.0 })
    }

    fn with_kind(id: impl Into<String>, position: f64, register: u16, kind: SensorKind) -> Self {
        Self {
            id: id.into(),
            position,
            register,
            kind,
            last_update: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn kind(&self) -> &SensorKind {
        &self.kind
    }

    /// Register mirroring this sensor.
    pub fn register(&self) -> u16 {
        self.register
    }

    /// When the sensor last received a value.
    pub fn last_update(&self) -> Option<SystemTime> {
        self.last_update
    }

    /// Current value.
    pub fn value(&self) -> SensorValue {
        match self.kind {
            SensorKind::Proximity { detected } => SensorValue::Detected(detected),
            SensorKind::Level { level } => SensorValue::Level(level),
        }
    }

    /// Snapshot of the current value.
    pub fn read(&self) -> SensorReading {
        SensorReading {
            sensor_id: self.id.clone(),
            position: self.position,
            value: self.value(),
            timestamp: self.last_update.unwrap_or_else(SystemTime::now),
        }
    }

    /// Stores a new value; the value must match the sensor kind.
    pub fn update(&mut self, value: SensorValue) -> Result<SensorReading, DeviceError> {
        match (&mut self.kind, value) {
            (SensorKind::Proximity { detected }, SensorValue::Detected(d)) => *detected = d,
            (SensorKind::Level { level }, SensorValue::Level(l)) => *level = l.clamp(0.0, 100.0),
            (SensorKind::Proximity { .. }, SensorValue::Level(_)) => {
                return Err(DeviceError::Unsupported {
                    device: self.id.clone(),
                    operation: "level readings",
                });
            }
            (SensorKind::Level { .. }, SensorValue::Detected(_)) => {
                return Err(DeviceError::Unsupported {
                    device: self.id.clone(),
                    operation: "proximity readings",
                });
            }
        }
        self.last_update = Some(SystemTime::now());
        Ok(self.read())
    }

    /// Decodes a raw register value according to the sensor kind.
    pub fn decode_register(&self, raw: i32) -> SensorValue {
        match self.kind {
            SensorKind::Proximity { .. } => SensorValue::Detected(raw != 0),
            SensorKind::Level { .. } => SensorValue::Level(f64::from(raw) / 10.0),
        }
    }
}

/// Register encoding of a sensor value (levels × 10, booleans 0/1).
pub fn encode_register(value: SensorValue) -> i32 {
    match value {
        SensorValue::Detected(d) => i32::from(d),
        SensorValue::Level(l) => (l * 10.0).round() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut s = Sensor::proximity("proximity_filling", 25.0, 1000);
        let err = s.update(SensorValue::Level(40.0)).unwrap_err();
        assert_eq!(err.as_label(), "device_unsupported");
        assert!(s.last_update().is_none());
    }

    #[test]
    fn level_is_clamped_and_round_trips_through_register() {
        let mut s = Sensor::level("level_filling", 25.0, 1001);
        s.update(SensorValue::Level(120.0)).unwrap();
        assert_eq!(s.value(), SensorValue::Level(100.0));

        let raw = encode_register(SensorValue::Level(96.7));
        assert_eq!(raw, 967);
        assert_eq!(s.decode_register(raw), SensorValue::Level(96.7));
    }

    #[test]
    fn loose_payloads() {
        assert_eq!(
            SensorValue::from_json(&json!({"value": true})),
            Some(SensorValue::Detected(true))
        );
        assert_eq!(
            SensorValue::from_json(&json!({"level": 12.5})),
            Some(SensorValue::Level(12.5))
        );
        assert_eq!(SensorValue::from_json(&json!("on")), None);
    }
}
