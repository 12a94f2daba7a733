//! # SCADA monitor.
//!
//! Tracks the last report of every device, evaluates the alarm rules on a
//! fixed interval and keeps bounded histories of device reports and alarms.
//!
//! ## Inputs
//! ```text
//!   DeviceHandler ── record_sensor / record_actuator ──┐
//!                                                      ├──► device states + history
//!   broker: factory/sensors/#, factory/actuators/# ────┘
//! ```
//!
//! ## Scan (every `scan_interval`)
//! 1. push each device state to the variable store (best-effort);
//! 2. evaluate the rules, one alarm per violation per scan:
//!    - level `> level_high` → `HIGH_LEVEL`, level `< level_low` → `LOW_LEVEL`
//!    - motor speed `> max_motor_speed` → `HIGH_SPEED`
//!    - no report for `> stale_after` → `STALE_DATA`
//!    - proximity asserted for `> stuck_after` → `STUCK_BOTTLE`
//! 3. each alarm is appended to the log, published on `factory/alarms`
//!    (errors logged) and announced on the event bus.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::select;
use tokio::sync::RwLock;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScadaConfig;
use crate::devices::{ActuatorState, SensorReading, SensorValue};
use crate::error::{InitError, ProtocolError, ScadaError};
use crate::events::{Bus, Event, EventKind};
use crate::protocols::{MessageBroker, TopicHandler, VariableStore, VariableType};
use crate::scada::alarm::{Alarm, AlarmKind, AlarmLog};

/// Topic alarms are published on.
pub const ALARM_TOPIC: &str = "factory/alarms";
/// Prefix of sensor report topics.
pub const SENSOR_TOPIC: &str = "factory/sensors";
/// Prefix of actuator report topics.
pub const ACTUATOR_TOPIC: &str = "factory/actuators";

/// Last report of one device.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceReport {
    Sensor { value: SensorValue },
    Actuator(ActuatorState),
}

/// Device state as tracked by the monitor.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceState {
    pub device_id: String,
    pub report: DeviceReport,
    pub updated_at: SystemTime,
    #[serde(skip)]
    seen: Instant,
    #[serde(skip)]
    asserted_since: Option<Instant>,
}

/// One entry of the device history.
#[derive(Clone, Debug, Serialize)]
pub struct HistoryEntry {
    pub timestamp: SystemTime,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub device_id: String,
    pub data: Value,
}

/// Summary for dashboards.
#[derive(Clone, Debug, Serialize)]
pub struct ScadaStatus {
    pub running: bool,
    pub device_count: usize,
    pub alarm_count: usize,
    pub unacknowledged_alarms: usize,
    pub history_len: usize,
    pub last_update: SystemTime,
}

/// Supervisory monitor of one line.
pub struct ScadaMonitor {
    cfg: ScadaConfig,
    variables: Arc<dyn VariableStore>,
    broker: Arc<dyn MessageBroker>,
    bus: Bus,
    devices: RwLock<BTreeMap<String, DeviceState>>,
    alarms: RwLock<AlarmLog>,
    history: RwLock<VecDeque<HistoryEntry>>,
    running: AtomicBool,
}

impl ScadaMonitor {
    pub fn new(
        cfg: ScadaConfig,
        variables: Arc<dyn VariableStore>,
        broker: Arc<dyn MessageBroker>,
        bus: Bus,
    ) -> Arc<Self> {
        Arc::new(Self {
            alarms: RwLock::new(AlarmLog::new(cfg.alarm_capacity)),
            cfg,
            variables,
            broker,
            bus,
            devices: RwLock::new(BTreeMap::new()),
            history: RwLock::new(VecDeque::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Subscribes to the sensor and actuator topics.
    ///
    /// The broker only keeps a weak reference to the monitor.
    pub async fn subscribe(self: &Arc<Self>) -> Result<(), InitError> {
        let relay: Arc<dyn TopicHandler> = Arc::new(Relay(Arc::downgrade(self)));
        for pattern in [
            format!("{SENSOR_TOPIC}/#"),
            format!("{ACTUATOR_TOPIC}/#"),
        ] {
            self.broker
                .subscribe(&pattern, Arc::clone(&relay))
                .await
                .map_err(|source| InitError::Subscription { pattern, source })?;
        }
        Ok(())
    }

    /// Records a sensor report.
    pub async fn record_sensor(&self, sensor_id: &str, value: SensorValue) {
        let now = Instant::now();
        {
            let mut devices = self.devices.write().await;
            let asserted_since = match value {
                SensorValue::Detected(true) => devices
                    .get(sensor_id)
                    .and_then(|d| d.asserted_since)
                    .or(Some(now)),
                _ => None,
            };
            devices.insert(
                sensor_id.to_string(),
                DeviceState {
                    device_id: sensor_id.to_string(),
                    report: DeviceReport::Sensor { value },
                    updated_at: SystemTime::now(),
                    seen: now,
                    asserted_since,
                },
            );
        }
        self.remember("sensor", sensor_id, json!(value)).await;
    }

    /// Records an actuator report.
    pub async fn record_actuator(&self, state: &ActuatorState) {
        let data = json!(state);
        self.devices.write().await.insert(
            state.actuator_id.clone(),
            DeviceState {
                device_id: state.actuator_id.clone(),
                report: DeviceReport::Actuator(state.clone()),
                updated_at: SystemTime::now(),
                seen: Instant::now(),
                asserted_since: None,
            },
        );
        self.remember("actuator", &state.actuator_id, data).await;
    }

    async fn remember(&self, kind: &'static str, device_id: &str, data: Value) {
        let mut history = self.history.write().await;
        if history.len() >= self.cfg.history_capacity.max(1) {
            history.pop_front();
        }
        history.push_back(HistoryEntry {
            timestamp: SystemTime::now(),
            kind,
            device_id: device_id.to_string(),
            data,
        });
    }

    /// Runs one monitoring scan and returns the alarms it raised.
    pub async fn scan(&self) -> Vec<Alarm> {
        let snapshot: Vec<DeviceState> = self.devices.read().await.values().cloned().collect();

        for device in &snapshot {
            self.push_variable(device).await;
        }

        let now = Instant::now();
        let mut violations = Vec::new();
        for device in &snapshot {
            let id = &device.device_id;
            match &device.report {
                DeviceReport::Sensor {
                    value: SensorValue::Level(level),
                } => {
                    if *level > self.cfg.level_high {
                        violations.push((
                            AlarmKind::HighLevel,
                            id,
                            format!("High level detected in {id}: {level:.1}%"),
                        ));
                    } else if *level < self.cfg.level_low {
                        violations.push((
                            AlarmKind::LowLevel,
                            id,
                            format!("Low level detected in {id}: {level:.1}%"),
                        ));
                    }
                }
                DeviceReport::Sensor {
                    value: SensorValue::Detected(true),
                } => {
                    if let Some(since) = device.asserted_since {
                        let held = now.saturating_duration_since(since);
                        if held > self.cfg.stuck_after {
                            violations.push((
                                AlarmKind::StuckBottle,
                                id,
                                format!("Bottle stuck at {id} for {:.1}s", held.as_secs_f64()),
                            ));
                        }
                    }
                }
                DeviceReport::Sensor { .. } => {}
                DeviceReport::Actuator(state) => {
                    if let Some(speed) = state.speed.filter(|s| *s > self.cfg.max_motor_speed) {
                        violations.push((
                            AlarmKind::HighSpeed,
                            id,
                            format!("Motor speed exceeds limit in {id}: {speed:.2}"),
                        ));
                    }
                }
            }

            let silent = now.saturating_duration_since(device.seen);
            if silent > self.cfg.stale_after {
                violations.push((
                    AlarmKind::StaleData,
                    id,
                    format!("No updates from {id} for {}s", silent.as_secs()),
                ));
            }
        }

        let mut raised = Vec::with_capacity(violations.len());
        for (kind, device_id, message) in violations {
            raised.push(self.raise(kind, device_id, message).await);
        }
        raised
    }

    async fn push_variable(&self, device: &DeviceState) {
        let value = match &device.report {
            DeviceReport::Sensor { value } => json!(value),
            DeviceReport::Actuator(state) => json!(state),
        };
        let name = device.device_id.as_str();
        let result = match self.variables.update(name, value.clone()).await {
            Err(ProtocolError::VariableNotFound(_)) => {
                self.variables.create(name, value, VariableType::Object).await
            }
            other => other,
        };
        if let Err(e) = result {
            warn!(device = name, error = %e, label = e.as_label(), "variable push failed");
        }
    }

    /// Appends an alarm, publishes it and announces it on the bus.
    pub async fn raise(&self, kind: AlarmKind, device_id: &str, message: String) -> Alarm {
        let alarm = self.alarms.write().await.raise(kind, device_id, message);
        warn!(alarm = %alarm.id, kind = kind.as_str(), device = device_id, "{}", alarm.message);

        if let Err(e) = self.broker.publish(ALARM_TOPIC, json!(alarm)).await {
            warn!(alarm = %alarm.id, error = %e, "alarm publish failed");
        }
        self.bus.publish(
            Event::new(EventKind::AlarmRaised)
                .with_alarm(alarm.id.as_str())
                .with_device(device_id)
                .with_reason(alarm.message.as_str()),
        );
        alarm
    }

    /// Scans every `scan_interval` until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        self.running.store(true, Ordering::Release);
        info!(interval = ?self.cfg.scan_interval, "scada monitor started");
        loop {
            let raised = self.scan().await;
            if !raised.is_empty() {
                debug!(count = raised.len(), "scan raised alarms");
            }

            let sleep = time::sleep(self.cfg.scan_interval);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = token.cancelled() => { break; }
            }
        }
        self.running.store(false, Ordering::Release);
        info!("scada monitor stopped");
    }

    /// Acknowledges an alarm; `Ok(false)` if it already was.
    pub async fn acknowledge_alarm(&self, alarm_id: &str) -> Result<bool, ScadaError> {
        let changed = self.alarms.write().await.acknowledge(alarm_id)?;
        if changed {
            info!(alarm = alarm_id, "alarm acknowledged");
            self.bus
                .publish(Event::new(EventKind::AlarmAcknowledged).with_alarm(alarm_id));
        }
        Ok(changed)
    }

    pub async fn active_alarms(&self) -> Vec<Alarm> {
        self.alarms.read().await.active()
    }

    pub async fn alarms(&self) -> Vec<Alarm> {
        self.alarms.read().await.all()
    }

    pub async fn device_state(&self, device_id: &str) -> Option<DeviceState> {
        self.devices.read().await.get(device_id).cloned()
    }

    /// Up to `limit` most recent history entries, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub async fn status(&self) -> ScadaStatus {
        let alarms = self.alarms.read().await;
        ScadaStatus {
            running: self.running.load(Ordering::Acquire),
            device_count: self.devices.read().await.len(),
            alarm_count: alarms.len(),
            unacknowledged_alarms: alarms.unacknowledged(),
            history_len: self.history.read().await.len(),
            last_update: SystemTime::now(),
        }
    }

    async fn on_broker_message(&self, topic: &str, payload: &Value) {
        let device_from_topic = topic.rsplit('/').next().unwrap_or(topic);

        if topic.starts_with(SENSOR_TOPIC) {
            let parsed = serde_json::from_value::<SensorReading>(payload.clone())
                .map(|r| (r.sensor_id, r.value))
                .ok()
                .or_else(|| {
                    SensorValue::from_json(payload).map(|v| (device_from_topic.to_string(), v))
                });
            match parsed {
                Some((id, value)) => self.record_sensor(&id, value).await,
                None => debug!(topic, "unreadable sensor payload dropped"),
            }
        } else if topic.starts_with(ACTUATOR_TOPIC) {
            match serde_json::from_value::<ActuatorState>(payload.clone()) {
                Ok(state) => self.record_actuator(&state).await,
                Err(e) => debug!(topic, error = %e, "unreadable actuator payload dropped"),
            }
        }
    }
}

struct Relay(Weak<ScadaMonitor>);

#[async_trait]
impl TopicHandler for Relay {
    async fn on_message(&self, topic: &str, payload: &Value) {
        if let Some(monitor) = self.0.upgrade() {
            monitor.on_broker_message(topic, payload).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{MemoryBroker, MemoryVariables};
    use std::time::Duration;

    fn monitor() -> (Arc<ScadaMonitor>, Arc<MemoryVariables>, Arc<MemoryBroker>) {
        let vars = Arc::new(MemoryVariables::new());
        let broker = Arc::new(MemoryBroker::new());
        let m = ScadaMonitor::new(
            ScadaConfig::default(),
            vars.clone(),
            broker.clone(),
            Bus::new(64),
        );
        (m, vars, broker)
    }

    #[tokio::test]
    async fn scan_pushes_variables() {
        let (m, vars, _) = monitor();
        m.record_sensor("level_filling", SensorValue::Level(50.0)).await;
        assert!(m.scan().await.is_empty());
        assert_eq!(vars.read("level_filling").await, Ok(json!(50.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_and_stuck_rules() {
        let (m, _, _) = monitor();
        m.record_sensor("proximity_capping", SensorValue::Detected(true)).await;
        time::sleep(Duration::from_secs(5)).await;
        m.record_sensor("proximity_capping", SensorValue::Detected(true)).await;
        time::sleep(Duration::from_secs(6)).await;

        let kinds: Vec<AlarmKind> = m.scan().await.into_iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlarmKind::StuckBottle]);

        time::sleep(Duration::from_secs(30)).await;
        let kinds: Vec<AlarmKind> = m.scan().await.into_iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlarmKind::StuckBottle, AlarmKind::StaleData]);
    }

    #[tokio::test]
    async fn broker_reports_are_recorded() {
        let (m, _, broker) = monitor();
        m.subscribe().await.unwrap();

        broker
            .publish("factory/sensors/level_filling", json!({"level": 42.0}))
            .await
            .unwrap();
        let state = m.device_state("level_filling").await.unwrap();
        assert_eq!(
            state.report,
            DeviceReport::Sensor {
                value: SensorValue::Level(42.0)
            }
        );
        assert_eq!(m.history(10).await.len(), 1);
    }
}
