//! Supervisory layer: device state tracking, alarm rules and the alarm log.

mod alarm;
mod monitor;

pub use alarm::{Alarm, AlarmKind, AlarmLog, Severity};
pub use monitor::{
    ALARM_TOPIC, ACTUATOR_TOPIC, DeviceReport, DeviceState, HistoryEntry, SENSOR_TOPIC,
    ScadaMonitor, ScadaStatus,
};
