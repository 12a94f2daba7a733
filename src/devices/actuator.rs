//! Actuators: valve, motors and the capping head.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Actuator kind with its kind-specific parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum ActuatorKind {
    Valve { flow_rate: f64 },
    ConveyorMotor { max_speed: f64, current_speed: f64 },
    CappingActuator,
    LabelingMotor { max_speed: f64, current_speed: f64 },
}

impl ActuatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorKind::Valve { .. } => "valve",
            ActuatorKind::ConveyorMotor { .. } => "conveyor_motor",
            ActuatorKind::CappingActuator => "capping_actuator",
            ActuatorKind::LabelingMotor { .. } => "labeling_motor",
        }
    }
}

/// Command accepted by [`Actuator::apply`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActuatorCommand {
    Activate,
    Deactivate,
    /// Motors only; clamped to `[0, max_speed]`.
    SetSpeed(f64),
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorCommand::Activate => f.write_str("activate"),
            ActuatorCommand::Deactivate => f.write_str("deactivate"),
            ActuatorCommand::SetSpeed(v) => write!(f, "set_speed:{v}"),
        }
    }
}

/// Serializable actuator snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActuatorState {
    pub actuator_id: String,
    pub kind: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_speed: Option<f64>,
    #[serde(default)]
    pub last_activation: Option<SystemTime>,
}

/// An actuator on the line.
#[derive(Clone, Debug)]
pub struct Actuator {
    id: String,
    register: u16,
    kind: ActuatorKind,
    active: bool,
    last_activation: Option<SystemTime>,
}

impl Actuator {
    pub fn new(id: impl Into<String>, register: u16, kind: ActuatorKind) -> Self {
        Self {
            id: id.into(),
            register,
            kind,
            active: false,
            last_activation: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &ActuatorKind {
        &self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Register mirroring this actuator.
    pub fn register(&self) -> u16 {
        self.register
    }

    /// Current speed of a motor; `None` for other kinds.
    pub fn speed(&self) -> Option<f64> {
        match self.kind {
            ActuatorKind::ConveyorMotor { current_speed, .. }
            | ActuatorKind::LabelingMotor { current_speed, .. } => Some(current_speed),
            _ => None,
        }
    }

    /// Switches on. Motors run at full speed.
    pub fn activate(&mut self) {
        self.active = true;
        self.last_activation = Some(SystemTime::now());
        if let ActuatorKind::ConveyorMotor { max_speed, current_speed }
        | ActuatorKind::LabelingMotor { max_speed, current_speed } = &mut self.kind
        {
            *current_speed = *max_speed;
        }
    }

    /// Switches off. Motors stop.
    pub fn deactivate(&mut self) {
        self.active = false;
        if let ActuatorKind::ConveyorMotor { current_speed, .. }
        | ActuatorKind::LabelingMotor { current_speed, .. } = &mut self.kind
        {
            *current_speed = 0.0;
        }
    }

    /// Sets a motor speed, clamped to `[0, max_speed]`; active iff speed > 0.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), DeviceError> {
        match &mut self.kind {
            ActuatorKind::ConveyorMotor { max_speed, current_speed }
            | ActuatorKind::LabelingMotor { max_speed, current_speed } => {
                *current_speed = speed.clamp(0.0, *max_speed);
                let was_active = self.active;
                self.active = *current_speed > 0.0;
                if self.active && !was_active {
                    self.last_activation = Some(SystemTime::now());
                }
                Ok(())
            }
            _ => Err(DeviceError::Unsupported {
                device: self.id.clone(),
                operation: "speed control",
            }),
        }
    }

    /// Applies a parsed command.
    pub fn apply(&mut self, cmd: ActuatorCommand) -> Result<(), DeviceError> {
        match cmd {
            ActuatorCommand::Activate => self.activate(),
            ActuatorCommand::Deactivate => self.deactivate(),
            ActuatorCommand::SetSpeed(v) => self.set_speed(v)?,
        }
        Ok(())
    }

    /// Snapshot for status and monitoring.
    pub fn state(&self) -> ActuatorState {
        let max_speed = match self.kind {
            ActuatorKind::ConveyorMotor { max_speed, .. }
            | ActuatorKind::LabelingMotor { max_speed, .. } => Some(max_speed),
            _ => None,
        };
        ActuatorState {
            actuator_id: self.id.clone(),
            kind: self.kind.as_str().to_string(),
            active: self.active,
            speed: self.speed(),
            max_speed,
            last_activation: self.last_activation,
        }
    }

    /// Register encoding: motors as speed × 100, everything else 0/1.
    pub fn register_value(&self) -> i32 {
        match self.speed() {
            Some(s) => (s * 100.0).round() as i32,
            None => i32::from(self.active),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conveyor() -> Actuator {
        Actuator::new(
            "main_conveyor",
            2300,
            ActuatorKind::ConveyorMotor {
                max_speed: 1.0,
                current_speed: 0.0,
            },
        )
    }

    #[test]
    fn speed_is_clamped_and_drives_active_flag() {
        let mut motor = conveyor();
        motor.set_speed(3.0).unwrap();
        assert_eq!(motor.speed(), Some(1.0));
        assert!(motor.is_active());
        assert_eq!(motor.register_value(), 100);

        motor.set_speed(-1.0).unwrap();
        assert!(!motor.is_active());
    }

    #[test]
    fn valve_rejects_speed() {
        let mut valve = Actuator::new("filling_valve", 2000, ActuatorKind::Valve { flow_rate: 1.0 });
        assert!(valve.set_speed(0.5).is_err());
        valve.apply(ActuatorCommand::Activate).unwrap();
        assert_eq!(valve.register_value(), 1);
        assert_eq!(valve.state().speed, None);
    }
}
