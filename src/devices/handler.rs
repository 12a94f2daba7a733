//! # Device handler: the switchboard between devices, PLCs and SCADA.
//!
//! ```text
//!   handle_sensor_data(id, v)
//!       ├─► DeviceRegistry::apply_sensor      (last-writer-wins)
//!       ├─► RegisterStore::update             (best-effort)
//!       ├─► ScadaMonitor::record_sensor
//!       └─► route by id ──► PlcController::handle_sensor_data
//!                 └─ unmapped ──► warn + RoutingFailed event, dropped
//! ```
//!
//! The `publish_*` variants serve the periodic line refresh: they update the
//! registry and registers and publish on the broker, where the SCADA monitor
//! picks them up, but they never reach a PLC.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::SimulationConfig;
use crate::context::LineContext;
use crate::devices::actuator::{ActuatorCommand, ActuatorState};
use crate::devices::plc::{PlcController, PlcRole, PlcSnapshot};
use crate::devices::registry::DeviceRegistry;
use crate::devices::sensor::{SensorValue, encode_register};
use crate::error::{DeviceError, InitError, RoutingError};
use crate::events::{Bus, Event, EventKind};
use crate::protocols::{MessageBroker, RegisterStore};
use crate::scada::{ACTUATOR_TOPIC, SENSOR_TOPIC, ScadaMonitor};

/// Routes device traffic to PLCs and the SCADA monitor.
pub struct DeviceHandler {
    registry: Arc<DeviceRegistry>,
    scada: Arc<ScadaMonitor>,
    registers: Arc<dyn RegisterStore>,
    broker: Arc<dyn MessageBroker>,
    bus: Bus,
    /// Indexed by [`PlcRole::zone`].
    plcs: [Arc<PlcController>; 4],
    initialized: AtomicBool,
}

impl DeviceHandler {
    pub fn new(
        ctx: &LineContext,
        sim: &SimulationConfig,
        registry: Arc<DeviceRegistry>,
        scada: Arc<ScadaMonitor>,
    ) -> Self {
        let plcs = PlcRole::ALL.map(|role| {
            Arc::new(PlcController::new(
                role,
                sim.clone(),
                Arc::clone(&ctx.registers),
                Arc::clone(&ctx.variables),
            ))
        });
        Self {
            registry,
            scada,
            registers: Arc::clone(&ctx.registers),
            broker: Arc::clone(&ctx.broker),
            bus: ctx.bus.clone(),
            plcs,
            initialized: AtomicBool::new(false),
        }
    }

    /// Initializes every PLC. Calling it again is a no-op.
    pub async fn initialize(&self) -> Result<(), InitError> {
        if self.initialized.load(Ordering::Acquire) {
            debug!("device handler already initialized");
            return Ok(());
        }
        for plc in &self.plcs {
            plc.initialize().await?;
        }
        self.initialized.store(true, Ordering::Release);
        info!(plcs = self.plcs.len(), "device handler initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// PLC of a zone.
    pub fn plc(&self, role: PlcRole) -> &Arc<PlcController> {
        &self.plcs[usize::from(role.zone())]
    }

    /// Zone a sensor id belongs to.
    pub fn route_sensor(&self, sensor_id: &str) -> Result<PlcRole, RoutingError> {
        PlcRole::for_sensor(sensor_id).ok_or_else(|| RoutingError::Unmapped {
            device_id: sensor_id.to_string(),
        })
    }

    /// Zone an actuator id belongs to.
    pub fn route_actuator(&self, actuator_id: &str) -> Result<PlcRole, RoutingError> {
        PlcRole::for_actuator(actuator_id).ok_or_else(|| RoutingError::Unmapped {
            device_id: actuator_id.to_string(),
        })
    }

    /// Handles a sensor event raised by the process: registry, register,
    /// SCADA, then the routed PLC (synchronously).
    pub async fn handle_sensor_data(
        &self,
        sensor_id: &str,
        value: SensorValue,
    ) -> Result<(), DeviceError> {
        let (reading, register) = self.registry.apply_sensor(sensor_id, value).await?;
        self.write_register(register, encode_register(reading.value)).await;
        self.scada.record_sensor(sensor_id, reading.value).await;

        match self.route_sensor(sensor_id) {
            Ok(role) => {
                debug!(sensor_id, plc = role.controller_name(), "routing sensor data");
                self.plc(role).handle_sensor_data(sensor_id, reading.value).await;
            }
            Err(e) => self.routing_failed(sensor_id, &e),
        }
        Ok(())
    }

    /// Refresh path for sensors: registry, register and broker; no PLC routing.
    pub async fn publish_sensor(
        &self,
        sensor_id: &str,
        value: SensorValue,
    ) -> Result<(), DeviceError> {
        let (reading, register) = self.registry.apply_sensor(sensor_id, value).await?;
        self.write_register(register, encode_register(reading.value)).await;
        let topic = format!("{SENSOR_TOPIC}/{sensor_id}");
        if let Err(e) = self.broker.publish(&topic, json!(reading)).await {
            warn!(sensor_id, error = %e, "sensor publish failed");
        }
        Ok(())
    }

    /// Applies an actuator command and reports the new state to SCADA.
    pub async fn handle_actuator_command(
        &self,
        actuator_id: &str,
        cmd: ActuatorCommand,
    ) -> Result<ActuatorState, DeviceError> {
        if let Err(e) = self.route_actuator(actuator_id) {
            self.routing_failed(actuator_id, &e);
        }
        let (state, register, raw) = self.registry.command_actuator(actuator_id, cmd).await?;
        self.write_register(register, raw).await;
        self.scada.record_actuator(&state).await;
        debug!(actuator_id, command = %cmd, "actuator command applied");
        Ok(state)
    }

    /// Refresh path for actuators: republishes the current state to the
    /// register and the broker without changing it.
    pub async fn publish_actuator(
        &self,
        actuator_id: &str,
    ) -> Result<ActuatorState, DeviceError> {
        let (state, register, raw) = self
            .registry
            .actuator_report(actuator_id)
            .await
            .ok_or_else(|| DeviceError::UnknownDevice(actuator_id.to_string()))?;
        self.write_register(register, raw).await;
        let topic = format!("{ACTUATOR_TOPIC}/{actuator_id}");
        if let Err(e) = self.broker.publish(&topic, json!(state)).await {
            warn!(actuator_id, error = %e, "actuator publish failed");
        }
        Ok(state)
    }

    /// Reads a sensor register and handles it as a sensor event.
    ///
    /// Returns the decoded value, or `None` if the register could not be read.
    pub async fn process_register(
        &self,
        address: u16,
    ) -> Result<Option<SensorValue>, RoutingError> {
        let Some(sensor) = self.registry.sensor_for_register(address).await else {
            let err = RoutingError::UnknownRegister { address };
            warn!(address, label = err.as_label(), "unknown register address");
            return Err(err);
        };
        let raw = match self.registers.read(address).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(address, error = %e, "register read failed");
                return Ok(None);
            }
        };
        let value = sensor.decode_register(raw);
        if let Err(e) = self.handle_sensor_data(sensor.id(), value).await {
            warn!(address, sensor_id = sensor.id(), error = %e, "register value rejected");
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Runs one scan cycle on every PLC (expires timers).
    pub async fn scan(&self) {
        for plc in &self.plcs {
            plc.scan().await;
        }
    }

    /// Pushes every PLC's status and operation to the variable store.
    pub async fn sync_plc_variables(&self) {
        for plc in &self.plcs {
            plc.sync_variables().await;
        }
    }

    pub async fn plc_snapshots(&self) -> Vec<PlcSnapshot> {
        let mut out = Vec::with_capacity(self.plcs.len());
        for plc in &self.plcs {
            out.push(plc.snapshot().await);
        }
        out
    }

    async fn write_register(&self, address: u16, value: i32) {
        if let Err(e) = self.registers.update(address, value).await {
            warn!(address, value, error = %e, "register write failed");
        }
    }

    fn routing_failed(&self, device_id: &str, err: &RoutingError) {
        warn!(device_id, label = err.as_label(), "{err}");
        self.bus.publish(
            Event::new(EventKind::RoutingFailed)
                .with_device(device_id)
                .with_reason(err.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LineConfig;
    use crate::devices::plc::Operation;

    fn handler() -> (DeviceHandler, LineContext, Arc<ScadaMonitor>) {
        let cfg = LineConfig::default();
        let ctx = LineContext::in_memory(&cfg);
        let scada = ScadaMonitor::new(
            cfg.scada.clone(),
            Arc::clone(&ctx.variables),
            Arc::clone(&ctx.broker),
            ctx.bus.clone(),
        );
        let registry = Arc::new(DeviceRegistry::from_layout(&cfg.layout));
        let h = DeviceHandler::new(&ctx, &cfg.simulation, registry, scada.clone());
        (h, ctx, scada)
    }

    #[tokio::test]
    async fn sensor_event_reaches_plc_scada_and_registers() {
        let (h, ctx, scada) = handler();
        h.initialize().await.unwrap();

        h.handle_sensor_data("proximity_filling", SensorValue::Detected(true))
            .await
            .unwrap();

        assert_eq!(
            h.plc(PlcRole::Filling).current_operation().await,
            Operation::StartFill
        );
        assert!(scada.device_state("proximity_filling").await.is_some());
        assert_eq!(ctx.registers.read(1000).await, Ok(1));
    }

    #[tokio::test]
    async fn unmapped_sensor_is_logged_and_dropped() {
        let (h, ctx, _) = handler();
        let mut rx = ctx.bus.subscribe();

        h.handle_sensor_data("proximity_pre_fill", SensorValue::Detected(true))
            .await
            .unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::RoutingFailed);
        assert_eq!(ev.device.as_deref(), Some("proximity_pre_fill"));
        assert_eq!(
            h.route_sensor("proximity_pre_fill"),
            Err(RoutingError::Unmapped {
                device_id: "proximity_pre_fill".into()
            })
        );
    }

    #[tokio::test]
    async fn register_driven_sensor_event() {
        let (h, ctx, _) = handler();
        ctx.registers.update(1001, 960).await.unwrap();
        h.handle_sensor_data("proximity_filling", SensorValue::Detected(true))
            .await
            .unwrap();

        let value = h.process_register(1001).await.unwrap();
        assert_eq!(value, Some(SensorValue::Level(96.0)));
        assert_eq!(
            h.plc(PlcRole::Filling).current_operation().await,
            Operation::FillComplete
        );
        assert_eq!(
            h.process_register(1500).await,
            Err(RoutingError::UnknownRegister { address: 1500 })
        );
    }

    #[tokio::test]
    async fn actuator_commands_update_state_and_register() {
        let (h, ctx, scada) = handler();
        let state = h
            .handle_actuator_command("labeling_motor", ActuatorCommand::SetSpeed(0.5))
            .await
            .unwrap();
        assert_eq!(state.speed, Some(0.5));
        assert_eq!(ctx.registers.read(2200).await, Ok(50));
        assert!(scada.device_state("labeling_motor").await.is_some());

        let err = h
            .handle_actuator_command("filling_valve", ActuatorCommand::SetSpeed(1.0))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "device_unsupported");
    }

    #[tokio::test]
    async fn actuator_refresh_republishes_without_changing_state() {
        let (h, ctx, scada) = handler();
        scada.subscribe().await.unwrap();
        h.registry()
            .command_actuator("main_conveyor", ActuatorCommand::Activate)
            .await
            .unwrap();
        assert!(scada.device_state("main_conveyor").await.is_none());

        let state = h.publish_actuator("main_conveyor").await.unwrap();
        assert!(state.active);
        assert_eq!(state.speed, Some(1.0));
        assert_eq!(ctx.registers.read(2300).await, Ok(100));
        // delivered to SCADA through the broker subscription
        assert!(scada.device_state("main_conveyor").await.is_some());
        assert_eq!(h.registry().actuator("main_conveyor").await, Some(state));

        let err = h.publish_actuator("spare_pump").await.unwrap_err();
        assert_eq!(err.as_label(), "device_unknown");
    }

    #[tokio::test]
    async fn initialize_twice_is_harmless() {
        let (h, _, _) = handler();
        h.initialize().await.unwrap();
        h.initialize().await.unwrap();
        assert!(h.is_initialized());
    }
}
