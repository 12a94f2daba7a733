//! # Simulated station PLCs.
//!
//! Each [`PlcController`] owns one zone of the line and exposes two readable
//! fields, `status` and `current_operation`. The process engine never calls
//! into a PLC to make it work; it raises sensor events through the device
//! handler and then **polls** `current_operation` until the expected token
//! shows up.
//!
//! ```text
//!   proximity_filling = true   ──► status filling,  op start_fill,    valve on
//!   level_filling >= target    ──► status complete, op fill_complete, valve off
//!
//!   proximity_capping = true   ──► status capping,  op start_cap,     head on, timer(cap_time)
//!   timer expired (scan)       ──► status complete, op cap_complete,  head off
//!
//!   proximity_labeling = true  ──► status labeling, op start_label,   motor on, timer(label_time)
//!   timer expired (scan)       ──► status complete, op label_complete, motor off
//!
//!   proximity_* (conveyor)     ──► status running / idle
//! ```
//!
//! ## Rules
//! - The operation is a pure function of the last accepted sensor value and
//!   the timer; nothing else mutates it.
//! - Timers are evaluated lazily by [`PlcController::scan`], which every read
//!   accessor runs first (the scan cycle).
//! - A faulted PLC ignores sensor events but still answers reads.
//! - Every change is mirrored to the variable store (`<name>_status`,
//!   `<name>_operation`) and the zone's output register. Mirroring is
//!   best-effort.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SimulationConfig;
use crate::devices::sensor::SensorValue;
use crate::error::{InitError, ProtocolError};
use crate::process::Station;
use crate::protocols::registers::actuator_register;
use crate::protocols::{RegisterStore, VariableStore, VariableType};

/// Zone of the line a PLC controls; also the routing target of device ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlcRole {
    Filling,
    Capping,
    Labeling,
    Conveyor,
}

impl PlcRole {
    pub const ALL: [PlcRole; 4] = [
        PlcRole::Filling,
        PlcRole::Capping,
        PlcRole::Labeling,
        PlcRole::Conveyor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlcRole::Filling => "filling",
            PlcRole::Capping => "capping",
            PlcRole::Labeling => "labeling",
            PlcRole::Conveyor => "conveyor",
        }
    }

    /// Name of the controller, e.g. `filling_plc`.
    pub fn controller_name(&self) -> &'static str {
        match self {
            PlcRole::Filling => "filling_plc",
            PlcRole::Capping => "capping_plc",
            PlcRole::Labeling => "labeling_plc",
            PlcRole::Conveyor => "conveyor_plc",
        }
    }

    /// Register zone index (`address = base + zone × 100`).
    pub fn zone(&self) -> u16 {
        match self {
            PlcRole::Filling => 0,
            PlcRole::Capping => 1,
            PlcRole::Labeling => 2,
            PlcRole::Conveyor => 3,
        }
    }

    /// The actuator driven by this zone.
    pub fn actuator_id(&self) -> &'static str {
        match self {
            PlcRole::Filling => "filling_valve",
            PlcRole::Capping => "capping_actuator",
            PlcRole::Labeling => "labeling_motor",
            PlcRole::Conveyor => "main_conveyor",
        }
    }

    /// Routes a sensor id by the zone name it contains.
    pub fn for_sensor(sensor_id: &str) -> Option<Self> {
        PlcRole::ALL
            .into_iter()
            .find(|role| sensor_id.contains(role.as_str()))
    }

    /// Routes an actuator id; valves belong to the filling zone.
    pub fn for_actuator(actuator_id: &str) -> Option<Self> {
        if actuator_id.contains("valve") {
            return Some(PlcRole::Filling);
        }
        Self::for_sensor(actuator_id)
    }
}

impl From<Station> for PlcRole {
    fn from(station: Station) -> Self {
        match station {
            Station::Filling => PlcRole::Filling,
            Station::Capping => PlcRole::Capping,
            Station::Labeling => PlcRole::Labeling,
        }
    }
}

/// Handshake token exposed as `current_operation`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    None,
    StartFill,
    FillComplete,
    StartCap,
    CapComplete,
    StartLabel,
    LabelComplete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::None => "none",
            Operation::StartFill => "start_fill",
            Operation::FillComplete => "fill_complete",
            Operation::StartCap => "start_cap",
            Operation::CapComplete => "cap_complete",
            Operation::StartLabel => "start_label",
            Operation::LabelComplete => "label_complete",
        }
    }

    /// Token announcing the start of a station's operation.
    pub fn start_of(station: Station) -> Self {
        match station {
            Station::Filling => Operation::StartFill,
            Station::Capping => Operation::StartCap,
            Station::Labeling => Operation::StartLabel,
        }
    }

    /// Token announcing the end of a station's operation.
    pub fn complete_of(station: Station) -> Self {
        match station {
            Station::Filling => Operation::FillComplete,
            Station::Capping => Operation::CapComplete,
            Station::Labeling => Operation::LabelComplete,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational label exposed as `status`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlcStatus {
    #[default]
    Idle,
    Filling,
    Capping,
    Labeling,
    Complete,
    Running,
}

impl PlcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlcStatus::Idle => "idle",
            PlcStatus::Filling => "filling",
            PlcStatus::Capping => "capping",
            PlcStatus::Labeling => "labeling",
            PlcStatus::Complete => "complete",
            PlcStatus::Running => "running",
        }
    }
}

impl fmt::Display for PlcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of a PLC.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlcSnapshot {
    pub name: &'static str,
    pub status: PlcStatus,
    pub current_operation: Operation,
    pub output: bool,
    pub faulted: bool,
}

#[derive(Default)]
struct PlcState {
    status: PlcStatus,
    operation: Operation,
    output: bool,
    timer: Option<Instant>,
    faulted: bool,
}

impl PlcState {
    /// Applies `status`/`operation`/`output`; returns whether anything changed.
    fn set(&mut self, status: PlcStatus, operation: Operation, output: bool) -> bool {
        let changed =
            self.status != status || self.operation != operation || self.output != output;
        self.status = status;
        self.operation = operation;
        self.output = output;
        changed
    }
}

/// One simulated PLC.
pub struct PlcController {
    role: PlcRole,
    sim: SimulationConfig,
    registers: Arc<dyn RegisterStore>,
    variables: Arc<dyn VariableStore>,
    state: Mutex<PlcState>,
}

impl PlcController {
    pub fn new(
        role: PlcRole,
        sim: SimulationConfig,
        registers: Arc<dyn RegisterStore>,
        variables: Arc<dyn VariableStore>,
    ) -> Self {
        Self {
            role,
            sim,
            registers,
            variables,
            state: Mutex::new(PlcState::default()),
        }
    }

    pub fn role(&self) -> PlcRole {
        self.role
    }

    pub fn name(&self) -> &'static str {
        self.role.controller_name()
    }

    fn status_var(&self) -> String {
        format!("{}_status", self.name())
    }

    fn operation_var(&self) -> String {
        format!("{}_operation", self.name())
    }

    /// Declares the PLC's variables. Re-running it resets them to the current state.
    pub async fn initialize(&self) -> Result<(), InitError> {
        let st = self.state.lock().await;
        let vars = [
            (self.status_var(), st.status.as_str()),
            (self.operation_var(), st.operation.as_str()),
        ];
        for (name, value) in vars {
            let created = self
                .variables
                .create(&name, json!(value), VariableType::String)
                .await;
            let result = match created {
                Err(ProtocolError::VariableExists(_)) => {
                    self.variables.update(&name, json!(value)).await
                }
                other => other,
            };
            result.map_err(|source| InitError::Variable { name, source })?;
        }
        debug!(plc = self.name(), "plc initialized");
        Ok(())
    }

    /// Reacts to a routed sensor event.
    pub async fn handle_sensor_data(&self, sensor_id: &str, value: SensorValue) {
        let mut st = self.state.lock().await;
        if st.faulted {
            debug!(plc = self.name(), sensor_id, "plc faulted; sensor event ignored");
            return;
        }
        self.expire(&mut st);

        let changed = match (self.role, value) {
            (PlcRole::Filling, SensorValue::Detected(true)) if sensor_id.starts_with("proximity") => {
                st.set(PlcStatus::Filling, Operation::StartFill, true)
            }
            (PlcRole::Filling, SensorValue::Level(level))
                if sensor_id.starts_with("level") && level >= self.sim.fill_target =>
            {
                st.set(PlcStatus::Complete, Operation::FillComplete, false)
            }
            (PlcRole::Capping, SensorValue::Detected(true)) if sensor_id.starts_with("proximity") => {
                st.timer = Some(Instant::now() + self.sim.scaled(self.sim.cap_time));
                st.set(PlcStatus::Capping, Operation::StartCap, true)
            }
            (PlcRole::Labeling, SensorValue::Detected(true))
                if sensor_id.starts_with("proximity") =>
            {
                st.timer = Some(Instant::now() + self.sim.scaled(self.sim.label_time));
                st.set(PlcStatus::Labeling, Operation::StartLabel, true)
            }
            (PlcRole::Conveyor, SensorValue::Detected(active)) if sensor_id.starts_with("proximity") => {
                let status = if active { PlcStatus::Running } else { PlcStatus::Idle };
                let operation = st.operation;
                st.set(status, operation, active)
            }
            _ => false,
        };
        if changed {
            self.mirror(&st).await;
        }
    }

    /// Scan cycle: completes expired timers.
    pub async fn scan(&self) {
        let mut st = self.state.lock().await;
        if self.expire(&mut st) {
            self.mirror(&st).await;
        }
    }

    fn expire(&self, st: &mut PlcState) -> bool {
        let Some(deadline) = st.timer else {
            return false;
        };
        if Instant::now() < deadline {
            return false;
        }
        st.timer = None;
        let done = match self.role {
            PlcRole::Capping => Operation::CapComplete,
            PlcRole::Labeling => Operation::LabelComplete,
            PlcRole::Filling | PlcRole::Conveyor => return false,
        };
        st.set(PlcStatus::Complete, done, false)
    }

    async fn mirror(&self, st: &PlcState) {
        debug!(
            plc = self.name(),
            status = st.status.as_str(),
            operation = st.operation.as_str(),
            "plc state changed"
        );
        let writes = [
            (self.status_var(), st.status.as_str()),
            (self.operation_var(), st.operation.as_str()),
        ];
        for (name, value) in writes {
            if let Err(e) = self.variables.update(&name, json!(value)).await {
                warn!(plc = self.name(), variable = %name, error = %e, "variable mirror failed");
            }
        }
        let address = actuator_register(self.role.zone());
        if let Err(e) = self.registers.update(address, i32::from(st.output)).await {
            warn!(plc = self.name(), address, error = %e, "register mirror failed");
        }
    }

    /// Current handshake token (runs a scan first).
    pub async fn current_operation(&self) -> Operation {
        let mut st = self.state.lock().await;
        if self.expire(&mut st) {
            self.mirror(&st).await;
        }
        st.operation
    }

    /// Current status label (runs a scan first).
    pub async fn status(&self) -> PlcStatus {
        let mut st = self.state.lock().await;
        if self.expire(&mut st) {
            self.mirror(&st).await;
        }
        st.status
    }

    /// Puts the PLC into (or out of) a faulted state where sensor events are ignored.
    pub async fn set_fault(&self, faulted: bool) {
        let mut st = self.state.lock().await;
        if st.faulted != faulted {
            warn!(plc = self.name(), faulted, "plc fault state changed");
        }
        st.faulted = faulted;
    }

    /// Pushes status and operation to the variable store.
    pub async fn sync_variables(&self) {
        let st = self.state.lock().await;
        for (name, value) in [
            (self.status_var(), st.status.as_str()),
            (self.operation_var(), st.operation.as_str()),
        ] {
            if let Err(e) = self.variables.update(&name, json!(value)).await {
                warn!(plc = self.name(), variable = %name, error = %e, "variable sync failed");
            }
        }
    }

    pub async fn snapshot(&self) -> PlcSnapshot {
        let mut st = self.state.lock().await;
        if self.expire(&mut st) {
            self.mirror(&st).await;
        }
        PlcSnapshot {
            name: self.name(),
            status: st.status,
            current_operation: st.operation,
            output: st.output,
            faulted: st.faulted,
        }
    }
}
