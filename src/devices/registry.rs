//! # Device registry.
//!
//! Holds every sensor and actuator of the line with its last known value.
//! Entries are last-writer-wins: the process engine, the factory refresh and
//! explicit commands may all write the same device.
//!
//! ## Layout
//! ```text
//!   proximity_filling   25  reg 1000      filling_valve     reg 2000
//!   level_filling       25  reg 1001      capping_actuator  reg 2100
//!   proximity_capping   50  reg 1100      labeling_motor    reg 2200
//!   proximity_labeling  75  reg 1200      main_conveyor     reg 2300
//!   proximity_<name>     *  reg 1301..    (one per layout sensor position)
//! ```

use std::collections::BTreeMap;

use tokio::sync::RwLock;

use crate::config::FactoryLayout;
use crate::devices::actuator::{Actuator, ActuatorCommand, ActuatorKind, ActuatorState};
use crate::devices::plc::PlcRole;
use crate::devices::sensor::{Sensor, SensorReading, SensorValue};
use crate::error::DeviceError;
use crate::process::Station;
use crate::protocols::registers::{actuator_register, sensor_register};

/// Proximity slot within a zone.
const PROXIMITY_SLOT: u16 = 0;
/// Level slot within a zone.
const LEVEL_SLOT: u16 = 1;

/// Sensors and actuators of one line.
pub struct DeviceRegistry {
    sensors: RwLock<BTreeMap<String, Sensor>>,
    actuators: RwLock<BTreeMap<String, Actuator>>,
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            sensors: RwLock::new(BTreeMap::new()),
            actuators: RwLock::new(BTreeMap::new()),
        }
    }

    /// Builds the standard device set for `layout`.
    pub fn from_layout(layout: &FactoryLayout) -> Self {
        let mut sensors = BTreeMap::new();
        let mut add = |s: Sensor| {
            sensors.insert(s.id().to_string(), s);
        };

        for station in Station::ALL {
            let zone = PlcRole::from(station).zone();
            add(Sensor::proximity(
                format!("proximity_{}", station.as_str()),
                layout.station_position(station),
                sensor_register(zone, PROXIMITY_SLOT),
            ));
        }
        add(Sensor::level(
            "level_filling",
            layout.filling,
            sensor_register(PlcRole::Filling.zone(), LEVEL_SLOT),
        ));
        for (i, (name, position)) in layout.sensor_positions.iter().enumerate() {
            let slot = u16::try_from(i + 1).unwrap_or(u16::MAX).min(99);
            add(Sensor::proximity(
                format!("proximity_{name}"),
                *position,
                sensor_register(PlcRole::Conveyor.zone(), slot),
            ));
        }

        let mut actuators = BTreeMap::new();
        let kinds = [
            (PlcRole::Filling, ActuatorKind::Valve { flow_rate: 1.0 }),
            (PlcRole::Capping, ActuatorKind::CappingActuator),
            (
                PlcRole::Labeling,
                ActuatorKind::LabelingMotor {
                    max_speed: layout.labeling_max_speed,
                    current_speed: 0.0,
                },
            ),
            (
                PlcRole::Conveyor,
                ActuatorKind::ConveyorMotor {
                    max_speed: layout.conveyor_max_speed,
                    current_speed: 0.0,
                },
            ),
        ];
        for (role, kind) in kinds {
            let a = Actuator::new(role.actuator_id(), actuator_register(role.zone()), kind);
            actuators.insert(a.id().to_string(), a);
        }

        Self {
            sensors: RwLock::new(sensors),
            actuators: RwLock::new(actuators),
        }
    }

    /// Stores a sensor value and returns the new reading with its register.
    pub async fn apply_sensor(
        &self,
        sensor_id: &str,
        value: SensorValue,
    ) -> Result<(SensorReading, u16), DeviceError> {
        let mut sensors = self.sensors.write().await;
        let sensor = sensors
            .get_mut(sensor_id)
            .ok_or_else(|| DeviceError::UnknownDevice(sensor_id.to_string()))?;
        let reading = sensor.update(value)?;
        Ok((reading, sensor.register()))
    }

    /// Applies a command and returns the new state with its register value.
    pub async fn command_actuator(
        &self,
        actuator_id: &str,
        cmd: ActuatorCommand,
    ) -> Result<(ActuatorState, u16, i32), DeviceError> {
        let mut actuators = self.actuators.write().await;
        let actuator = actuators
            .get_mut(actuator_id)
            .ok_or_else(|| DeviceError::UnknownDevice(actuator_id.to_string()))?;
        actuator.apply(cmd)?;
        Ok((actuator.state(), actuator.register(), actuator.register_value()))
    }

    pub async fn sensor(&self, sensor_id: &str) -> Option<SensorReading> {
        self.sensors.read().await.get(sensor_id).map(Sensor::read)
    }

    pub async fn actuator(&self, actuator_id: &str) -> Option<ActuatorState> {
        self.actuators.read().await.get(actuator_id).map(Actuator::state)
    }

    /// Current state of an actuator with its register address and encoding.
    pub async fn actuator_report(&self, actuator_id: &str) -> Option<(ActuatorState, u16, i32)> {
        self.actuators
            .read()
            .await
            .get(actuator_id)
            .map(|a| (a.state(), a.register(), a.register_value()))
    }

    /// Ids of every actuator, ordered.
    pub async fn actuator_ids(&self) -> Vec<String> {
        self.actuators.read().await.keys().cloned().collect()
    }

    /// All sensor readings, ordered by id.
    pub async fn sensors(&self) -> Vec<SensorReading> {
        self.sensors.read().await.values().map(Sensor::read).collect()
    }

    /// All actuator states, ordered by id.
    pub async fn actuators(&self) -> Vec<ActuatorState> {
        self.actuators
            .read()
            .await
            .values()
            .map(Actuator::state)
            .collect()
    }

    /// `(id, position)` of every proximity sensor.
    pub async fn proximity_sensors(&self) -> Vec<(String, f64)> {
        self.sensors
            .read()
            .await
            .values()
            .filter(|s| s.value().detected().is_some())
            .map(|s| (s.id().to_string(), s.position()))
            .collect()
    }

    /// Sensor mirrored at `address`, with the decoder for its raw value.
    pub async fn sensor_for_register(&self, address: u16) -> Option<Sensor> {
        self.sensors
            .read()
            .await
            .values()
            .find(|s| s.register() == address)
            .cloned()
    }

    /// Current speed of the main conveyor (`0.0` if absent or stopped).
    pub async fn conveyor_speed(&self) -> f64 {
        self.actuators
            .read()
            .await
            .get(PlcRole::Conveyor.actuator_id())
            .and_then(Actuator::speed)
            .unwrap_or(0.0)
    }

    /// Switches every actuator off; returns the ids that were active.
    pub async fn deactivate_all(&self) -> Vec<String> {
        let mut actuators = self.actuators.write().await;
        actuators
            .values_mut()
            .filter(|a| a.is_active())
            .map(|a| {
                a.deactivate();
                a.id().to_string()
            })
            .collect()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_layout_devices_and_registers() {
        let reg = DeviceRegistry::from_layout(&FactoryLayout::default());

        let level = reg.sensor_for_register(1001).await.unwrap();
        assert_eq!(level.id(), "level_filling");
        assert_eq!(reg.sensor_for_register(1100).await.unwrap().id(), "proximity_capping");
        assert_eq!(reg.sensor_for_register(1301).await.unwrap().id(), "proximity_entry");
        assert!(reg.sensor_for_register(1999).await.is_none());

        // 3 station switches + 8 layout switches
        assert_eq!(reg.proximity_sensors().await.len(), 11);
        assert_eq!(reg.actuators().await.len(), 4);
    }

    #[tokio::test]
    async fn conveyor_speed_follows_commands() {
        let reg = DeviceRegistry::from_layout(&FactoryLayout::default());
        assert_eq!(reg.conveyor_speed().await, 0.0);

        let (state, address, raw) = reg
            .command_actuator("main_conveyor", ActuatorCommand::Activate)
            .await
            .unwrap();
        assert!(state.active);
        assert_eq!((address, raw), (2300, 100));
        assert_eq!(reg.conveyor_speed().await, 1.0);

        assert_eq!(reg.deactivate_all().await, vec!["main_conveyor".to_string()]);
        assert_eq!(reg.conveyor_speed().await, 0.0);
    }

    #[tokio::test]
    async fn unknown_devices_are_reported() {
        let reg = DeviceRegistry::new();
        let err = reg
            .apply_sensor("proximity_nowhere", SensorValue::Detected(true))
            .await
            .unwrap_err();
        assert_eq!(err, DeviceError::UnknownDevice("proximity_nowhere".into()));
    }
}
