//! # bottleline
//!
//! **bottleline** simulates the control stack of a bottling line: sensors and
//! actuators, one PLC per zone, a SCADA supervisory monitor, and the bottle
//! process engine that drives bottles through the filling, capping and
//! labeling stations.
//!
//! ## Architecture
//! ```text
//!                ┌──────────────────────────────────────────────────┐
//!                │ Factory (line loop)                              │
//!                │  - bottle FIFO (ids)   - tick refresh            │
//!                │  - JoinSet of work units, retry backoff          │
//!                └──────────────┬───────────────────────────────────┘
//!                               ▼ advance(id, token)
//!                ┌──────────────────────────────────────────────────┐
//!                │ ProcessEngine                                    │
//!                │  - bottle arena        - station locks           │
//!                │  - handshake polling   - station timeouts        │
//!                └──────┬────────────────────────────────▲──────────┘
//!      sensor events    │                                │ current_operation()
//!                       ▼                                │
//!                ┌──────────────┐  route by id   ┌───────┴────────┐
//!                │DeviceHandler ├───────────────►│ PlcController  │ ×4
//!                └──┬────────┬──┘                └───────┬────────┘
//!                   │        │ record                    │ status / outputs
//!                   │        ▼                           ▼
//!                   │  ┌─────────────┐  alarms   ┌────────────────────┐
//!                   │  │ ScadaMonitor├──────────►│ MessageBroker      │
//!                   │  └─────────────┘           │ RegisterStore      │
//!                   └───────────────────────────►│ VariableStore      │
//!                                                └────────────────────┘
//!
//!   Every component publishes typed Events on the Bus ──► SubscriberSet
//! ```
//!
//! ## Bottle lifecycle
//! ```text
//! NEW → WAITING_FILL → FILLING → FILLED → WAITING_CAP → CAPPING → CAPPED
//!     → WAITING_LABEL → LABELING → COMPLETED          (any non-terminal → ERROR)
//! ```
//!
//! ## Features
//! | Area            | Description                                             | Key types                                   |
//! |-----------------|---------------------------------------------------------|---------------------------------------------|
//! | **Process**     | Bottle state machine, station locks, handshake          | [`ProcessEngine`], [`Bottle`], [`Station`]  |
//! | **Devices**     | Sensors, actuators, PLCs and the routing handler        | [`DeviceHandler`], [`PlcController`]        |
//! | **SCADA**       | Threshold/staleness rules, alarms, device history       | [`ScadaMonitor`], [`Alarm`]                 |
//! | **Protocols**   | Register, variable and pub/sub capabilities (in memory) | [`RegisterStore`], [`MessageBroker`]        |
//! | **Line**        | Injection, dispatch, graceful start/stop, status        | [`Factory`], [`FactoryStatus`]              |
//! | **Events**      | Typed line events and pluggable subscribers             | [`Event`], [`Subscribe`], [`LogWriter`]     |
//! | **Config**      | Timing, layout, alarm thresholds, retry policy          | [`LineConfig`], [`BackoffPolicy`]           |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use bottleline::{Factory, LineConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = LineConfig::default();
//!     cfg.simulation.simulation_speed = 50.0;
//!
//!     let factory = Factory::builder(cfg).build();
//!     factory.start().await?;
//!     tokio::time::sleep(Duration::from_millis(200)).await;
//!     factory.stop().await?;
//!
//!     let status = factory.status().await;
//!     assert!(!status.running);
//!     assert!(status.bottles_produced >= 1);
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod devices;
mod error;
mod events;
mod factory;
mod policies;
mod process;
mod protocols;
mod scada;
mod subscribers;

pub mod shutdown;

// ---- Public re-exports ----

pub use config::{FactoryLayout, LineConfig, MAX_WAIT, ScadaConfig, SimulationConfig};
pub use context::LineContext;
pub use devices::{
    Actuator, ActuatorCommand, ActuatorKind, ActuatorState, DeviceHandler, DeviceRegistry,
    Operation, PlcController, PlcRole, PlcSnapshot, PlcStatus, Sensor, SensorKind, SensorReading,
    SensorValue, encode_register,
};
pub use error::{
    DeviceError, EngineError, FactoryError, InitError, ProtocolError, RoutingError, ScadaError,
    StationError,
};
pub use events::{Bus, Event, EventKind};
pub use factory::{
    CappingStatus, Factory, FactoryBuilder, FactoryStatus, FillingStatus, LabelingStatus,
    StationsStatus,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use process::{
    Bottle, BottleId, BottleState, MetricsSnapshot, ProcessEngine, ProcessStatus,
    ProductionMetrics, Station, StationGuard, StationLocks,
};
pub use protocols::{
    MemoryBroker, MemoryRegisters, MemoryVariables, MessageBroker, Protocol, ProtocolEvent,
    ProtocolMonitor, ProtocolSummary, RegisterStore, TopicHandler, VariableStore, VariableType,
    registers, topic_matches, validate_filter,
};
pub use scada::{
    ACTUATOR_TOPIC, ALARM_TOPIC, Alarm, AlarmKind, AlarmLog, DeviceReport, DeviceState,
    HistoryEntry, SENSOR_TOPIC, ScadaMonitor, ScadaStatus, Severity,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
