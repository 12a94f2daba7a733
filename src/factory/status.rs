//! Serializable line snapshot returned by [`Factory::status`](crate::Factory::status).

use serde::Serialize;

use crate::devices::PlcSnapshot;
use crate::process::{BottleId, MetricsSnapshot};
use crate::scada::ScadaStatus;

/// Point-in-time view of the whole line.
#[derive(Clone, Debug, Serialize)]
pub struct FactoryStatus {
    pub running: bool,
    /// Bottles injected since the line was built.
    pub bottles_produced: u64,
    /// Bottles still in the arena (not yet retired).
    pub bottles_in_progress: usize,
    pub stations: StationsStatus,
    pub conveyor_speed: f64,
    pub metrics: MetricsSnapshot,
    pub plcs: Vec<PlcSnapshot>,
    pub scada: ScadaStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct StationsStatus {
    pub filling: FillingStatus,
    pub capping: CappingStatus,
    pub labeling: LabelingStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct FillingStatus {
    pub busy: bool,
    pub occupant: Option<BottleId>,
    /// Last reading of `level_filling`.
    pub level: f64,
    pub valve_active: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct CappingStatus {
    pub busy: bool,
    pub occupant: Option<BottleId>,
    pub actuator_active: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct LabelingStatus {
    pub busy: bool,
    pub occupant: Option<BottleId>,
    pub motor_speed: f64,
}
