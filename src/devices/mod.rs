//! # Field devices and their controllers.
//!
//! - [`Sensor`] / [`Actuator`]: tagged device kinds with their readings;
//! - [`DeviceRegistry`]: every device of the line with its last value;
//! - [`PlcController`]: per-zone simulated PLC exposing `status` and
//!   `current_operation` for the handshake;
//! - [`DeviceHandler`]: routes device traffic to PLCs, registers and SCADA.

mod actuator;
mod handler;
mod plc;
mod registry;
mod sensor;

pub use actuator::{Actuator, ActuatorCommand, ActuatorKind, ActuatorState};
pub use handler::DeviceHandler;
pub use plc::{Operation, PlcController, PlcRole, PlcSnapshot, PlcStatus};
pub use registry::DeviceRegistry;
pub use sensor::{Sensor, SensorKind, SensorReading, SensorValue, encode_register};
