//! # Bottle process engine.
//!
//! Owns the bottle arena and the station locks, and advances one bottle by
//! exactly one unit of work per [`ProcessEngine::advance`] call.
//!
//! ## Units of work
//! ```text
//!   NEW                      convey → filling position   → WAITING_FILL
//!   WAITING_FILL | FILLING   filling phase               → FILLED
//!   FILLED                   convey → capping position   → WAITING_CAP
//!   WAITING_CAP | CAPPING    capping phase               → CAPPED
//!   CAPPED                   convey → labeling position  → WAITING_LABEL
//!   WAITING_LABEL | LABELING labeling phase              → COMPLETED
//!   COMPLETED                convey → line exit, count success, retire  (false)
//!   ERROR                    retire                                     (false)
//! ```
//!
//! ## Station phase
//! ```text
//!   acquire lock (cancellable, not timed)
//!     └─ timeout(1.5 × nominal / speed) {
//!          proximity=true ──► DeviceHandler ──► PLC
//!          poll current_operation every tick until start_<op>
//!          work (fill ticks / wait for the PLC timer)
//!          poll until <op>_complete
//!          proximity=false
//!        }
//!   release lock
//! ```
//!
//! ## Rules
//! - Station failures (timeout, device fault) put the bottle in `ERROR`,
//!   count it once in `failed_bottles`, retire it and return `Ok(false)`.
//! - Cancellation is not a failure: the bottle keeps its state and the
//!   call returns `Ok(true)`; a later `advance` resumes the phase.
//! - `Err(EngineError)` is reserved for engine inconsistencies (unknown
//!   bottle, illegal transition).
//! - A stopped conveyor ends a conveying unit without progress (`Ok(true)`).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::select;
use tokio::sync::RwLock;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{FactoryLayout, LineConfig, SimulationConfig};
use crate::devices::{ActuatorCommand, DeviceHandler, Operation, PlcRole, SensorValue};
use crate::error::{EngineError, StationError};
use crate::events::{Bus, Event, EventKind};
use crate::process::bottle::{Bottle, BottleId, BottleState};
use crate::process::metrics::{MetricsSnapshot, ProductionMetrics};
use crate::process::station::{Station, StationLocks};

/// Why a station phase stopped early.
enum PhaseError {
    Station(StationError),
    Engine(EngineError),
}

impl From<StationError> for PhaseError {
    fn from(e: StationError) -> Self {
        PhaseError::Station(e)
    }
}

impl From<EngineError> for PhaseError {
    fn from(e: EngineError) -> Self {
        PhaseError::Engine(e)
    }
}

/// Serializable engine overview.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessStatus {
    pub active_bottles: usize,
    pub bottles_by_state: BTreeMap<BottleState, usize>,
    pub stations: BTreeMap<Station, Option<BottleId>>,
}

/// The bottle state machine and station coordinator.
pub struct ProcessEngine {
    sim: SimulationConfig,
    layout: FactoryLayout,
    handler: Arc<DeviceHandler>,
    bus: Bus,
    metrics: ProductionMetrics,
    locks: StationLocks,
    next_id: AtomicU64,
    bottles: RwLock<HashMap<BottleId, Bottle>>,
    finished: RwLock<VecDeque<Bottle>>,
    finished_capacity: usize,
}

impl ProcessEngine {
    pub fn new(
        cfg: &LineConfig,
        handler: Arc<DeviceHandler>,
        bus: Bus,
        metrics: ProductionMetrics,
    ) -> Self {
        Self {
            sim: cfg.simulation.clone(),
            layout: cfg.layout.clone(),
            handler,
            bus,
            metrics,
            locks: StationLocks::default(),
            next_id: AtomicU64::new(0),
            bottles: RwLock::new(HashMap::new()),
            finished: RwLock::new(VecDeque::new()),
            finished_capacity: cfg.finished_capacity.max(1),
        }
    }

    /// Creates a new bottle at the line entry.
    pub async fn create_bottle(&self) -> BottleId {
        let id = BottleId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.bottles.write().await.insert(id, Bottle::new(id));
        self.announce_new(id);
        id
    }

    /// Admits a prepared bottle (any non-terminal state).
    pub async fn admit(&self, bottle: Bottle) -> Result<BottleId, EngineError> {
        let id = bottle.id;
        {
            let mut bottles = self.bottles.write().await;
            if bottles.contains_key(&id) {
                return Err(EngineError::DuplicateBottle(id));
            }
            self.next_id.fetch_max(id.get() + 1, Ordering::Relaxed);
            bottles.insert(id, bottle);
        }
        self.announce_new(id);
        Ok(id)
    }

    fn announce_new(&self, id: BottleId) {
        self.metrics.inc_created();
        debug!(bottle = %id, "bottle added");
        self.bus.publish(
            Event::new(EventKind::BottleAdded)
                .with_bottle(id.to_string())
                .with_state(BottleState::New),
        );
    }

    /// Performs one unit of work; `Ok(true)` while the bottle stays in the pipeline.
    pub async fn advance(
        &self,
        id: BottleId,
        token: &CancellationToken,
    ) -> Result<bool, EngineError> {
        let state = self.read(id, |b| b.state).await?;
        match state {
            BottleState::New => {
                self.convey(id, self.layout.filling, Some(BottleState::WaitingFill), token)
                    .await
            }
            BottleState::WaitingFill | BottleState::Filling => {
                self.station_phase(id, Station::Filling, token).await
            }
            BottleState::Filled => {
                self.convey(id, self.layout.capping, Some(BottleState::WaitingCap), token)
                    .await
            }
            BottleState::WaitingCap | BottleState::Capping => {
                self.station_phase(id, Station::Capping, token).await
            }
            BottleState::Capped => {
                self.convey(id, self.layout.labeling, Some(BottleState::WaitingLabel), token)
                    .await
            }
            BottleState::WaitingLabel | BottleState::Labeling => {
                self.station_phase(id, Station::Labeling, token).await
            }
            BottleState::Completed => {
                let arrived = self.convey(id, self.layout.conveyor_length, None, token).await?;
                if !arrived {
                    return Ok(true);
                }
                self.metrics.inc_successful();
                info!(bottle = %id, "bottle completed");
                self.bus
                    .publish(Event::new(EventKind::BottleCompleted).with_bottle(id.to_string()));
                self.retire(id).await;
                Ok(false)
            }
            BottleState::Error => {
                self.retire(id).await;
                Ok(false)
            }
        }
    }

    /// Moves the bottle towards `target` until it arrives, the conveyor is
    /// stopped, or `token` is cancelled.
    ///
    /// With `next = Some(state)` returns `Ok(true)` in every case (the bottle
    /// stays in the pipeline) and applies `state` on arrival. With
    /// `next = None` returns whether the bottle arrived.
    async fn convey(
        &self,
        id: BottleId,
        target: f64,
        next: Option<BottleState>,
        token: &CancellationToken,
    ) -> Result<bool, EngineError> {
        loop {
            let position = self.read(id, |b| b.position).await?;
            if position >= target {
                if let Some(state) = next {
                    self.transition(id, state).await?;
                }
                return Ok(true);
            }

            let speed = self.handler.registry().conveyor_speed().await;
            if speed <= 0.0 {
                debug!(bottle = %id, "conveyor stopped");
                return Ok(next.is_some());
            }

            let step = speed * self.sim.tick_interval;
            self.write(id, |b| b.position = (b.position + step).min(target))
                .await?;

            let sleep = time::sleep(self.sim.tick());
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = token.cancelled() => { return Ok(next.is_some()); }
            }
        }
    }

    async fn station_phase(
        &self,
        id: BottleId,
        station: Station,
        token: &CancellationToken,
    ) -> Result<bool, EngineError> {
        let Some(guard) = self.locks.acquire(station, id, token).await else {
            return Ok(true);
        };
        self.bus.publish(
            Event::new(EventKind::StationAcquired)
                .with_bottle(id.to_string())
                .with_station(station),
        );

        let timeout = self.sim.station_timeout(station);
        let result = match time::timeout(timeout, self.station_work(id, station, token)).await {
            Ok(r) => r,
            Err(_elapsed) => Err(PhaseError::Station(StationError::Timeout {
                station,
                timeout,
                observed: self.handler.plc(station.into()).current_operation().await,
            })),
        };

        let outcome = match result {
            Ok(()) => Ok(true),
            Err(PhaseError::Station(StationError::Canceled { .. })) => {
                debug!(bottle = %id, %station, "station phase interrupted");
                self.reset_actuator(station).await;
                Ok(true)
            }
            Err(PhaseError::Station(err)) => {
                self.reset_actuator(station).await;
                self.fail(id, err, timeout).await.map(|()| false)
            }
            Err(PhaseError::Engine(err)) => {
                self.reset_actuator(station).await;
                Err(err)
            }
        };

        drop(guard);
        self.bus.publish(
            Event::new(EventKind::StationReleased)
                .with_bottle(id.to_string())
                .with_station(station),
        );
        outcome
    }

    async fn station_work(
        &self,
        id: BottleId,
        station: Station,
        token: &CancellationToken,
    ) -> Result<(), PhaseError> {
        let proximity = format!("proximity_{}", station.as_str());
        let position = self.layout.station_position(station);
        self.write(id, |b| b.position = position).await?;

        let (working, done) = match station {
            Station::Filling => (BottleState::Filling, BottleState::Filled),
            Station::Capping => (BottleState::Capping, BottleState::Capped),
            Station::Labeling => (BottleState::Labeling, BottleState::Completed),
        };

        self.sense(station, &proximity, SensorValue::Detected(true))
            .await?;
        self.await_operation(station, Operation::start_of(station), token)
            .await?;
        self.transition(id, working).await?;
        self.command(station, ActuatorCommand::Activate).await?;

        if station == Station::Filling {
            self.fill(id, token).await?;
        }
        self.await_operation(station, Operation::complete_of(station), token)
            .await?;

        self.command(station, ActuatorCommand::Deactivate).await?;
        self.write(id, |b| match station {
            Station::Filling => {}
            Station::Capping => b.has_cap = true,
            Station::Labeling => b.has_label = true,
        })
        .await?;
        self.sense(station, &proximity, SensorValue::Detected(false))
            .await?;
        self.transition(id, done).await?;
        Ok(())
    }

    /// Raises the fill level one tick at a time until the target is reached.
    async fn fill(&self, id: BottleId, token: &CancellationToken) -> Result<(), PhaseError> {
        let step = self.sim.fill_step();
        let target = self.sim.fill_target;
        let mut level = self.read(id, |b| b.fill_level).await?;
        loop {
            if level < target {
                level = self
                    .write(id, |b| {
                        b.fill_level = (b.fill_level + step).min(100.0);
                        b.fill_level
                    })
                    .await?;
            }
            self.sense(Station::Filling, "level_filling", SensorValue::Level(level))
                .await?;
            if level >= target {
                return Ok(());
            }
            self.pause(Station::Filling, token).await?;
        }
    }

    /// Polls the station PLC until it shows `expected`.
    async fn await_operation(
        &self,
        station: Station,
        expected: Operation,
        token: &CancellationToken,
    ) -> Result<(), StationError> {
        let plc = self.handler.plc(station.into());
        loop {
            if plc.current_operation().await == expected {
                return Ok(());
            }
            self.pause(station, token).await?;
        }
    }

    /// Sleeps one tick; `Canceled` if `token` fires first.
    async fn pause(&self, station: Station, token: &CancellationToken) -> Result<(), StationError> {
        let sleep = time::sleep(self.sim.tick());
        tokio::pin!(sleep);
        select! {
            _ = &mut sleep => Ok(()),
            _ = token.cancelled() => Err(StationError::Canceled { station }),
        }
    }

    async fn sense(
        &self,
        station: Station,
        sensor_id: &str,
        value: SensorValue,
    ) -> Result<(), StationError> {
        self.handler
            .handle_sensor_data(sensor_id, value)
            .await
            .map_err(|e| StationError::Device {
                station,
                reason: e.to_string(),
            })
    }

    async fn command(&self, station: Station, cmd: ActuatorCommand) -> Result<(), StationError> {
        let actuator = PlcRole::from(station).actuator_id();
        self.handler
            .handle_actuator_command(actuator, cmd)
            .await
            .map(|_| ())
            .map_err(|e| StationError::Device {
                station,
                reason: e.to_string(),
            })
    }

    async fn reset_actuator(&self, station: Station) {
        if let Err(e) = self.command(station, ActuatorCommand::Deactivate).await {
            warn!(%station, error = %e, "actuator reset failed");
        }
    }

    /// Routes the bottle to `ERROR` (counted once) and retires it.
    async fn fail(
        &self,
        id: BottleId,
        err: StationError,
        timeout: std::time::Duration,
    ) -> Result<(), EngineError> {
        let station = err.station();
        if matches!(err, StationError::Timeout { .. }) {
            self.metrics.inc_station_timeouts();
            self.bus.publish(
                Event::new(EventKind::StationTimeout)
                    .with_bottle(id.to_string())
                    .with_station(station)
                    .with_timeout(timeout),
            );
        }

        self.mark_failed(id, Some(station), err.bottle_message(), err.as_label())
            .await?;
        self.retire(id).await;
        Ok(())
    }

    /// Takes a bottle the line gave up on out of the pipeline: `ERROR`
    /// (counted once) with `reason`, then retired.
    pub async fn abandon(&self, id: BottleId, reason: &str) -> Result<(), EngineError> {
        self.mark_failed(id, None, format!("abandoned: {reason}"), "engine_abandoned")
            .await?;
        self.retire(id).await;
        Ok(())
    }

    /// Sets `ERROR` unless the bottle is already terminal.
    async fn mark_failed(
        &self,
        id: BottleId,
        station: Option<Station>,
        message: String,
        label: &'static str,
    ) -> Result<(), EngineError> {
        let moved = {
            let mut bottles = self.bottles.write().await;
            let bottle = bottles
                .get_mut(&id)
                .ok_or(EngineError::UnknownBottle(id))?;
            if bottle.state.is_terminal() {
                false
            } else {
                bottle.state = BottleState::Error;
                bottle.error = Some(message.clone());
                true
            }
        };
        if !moved {
            return Ok(());
        }

        self.metrics.inc_failed();
        let mut ev = Event::new(EventKind::BottleFailed)
            .with_bottle(id.to_string())
            .with_state(BottleState::Error);
        match station {
            Some(station) => {
                warn!(bottle = %id, %station, label, "{message}");
                ev = ev.with_station(station);
            }
            None => warn!(bottle = %id, label, "{message}"),
        }
        self.bus.publish(ev.with_reason(message));
        Ok(())
    }

    /// Moves the bottle to `next`; re-entering the current state is a no-op.
    async fn transition(&self, id: BottleId, next: BottleState) -> Result<(), EngineError> {
        {
            let mut bottles = self.bottles.write().await;
            let bottle = bottles
                .get_mut(&id)
                .ok_or(EngineError::UnknownBottle(id))?;
            if bottle.state == next {
                return Ok(());
            }
            if !bottle.state.can_transition_to(next) {
                return Err(EngineError::InvalidTransition {
                    id,
                    from: bottle.state,
                    to: next,
                });
            }
            bottle.state = next;
        }

        debug!(bottle = %id, state = %next, "bottle state changed");
        let mut ev = Event::new(EventKind::BottleStateChanged)
            .with_bottle(id.to_string())
            .with_state(next);
        if let Some(station) = next.station() {
            ev = ev.with_station(station);
        }
        self.bus.publish(ev);
        Ok(())
    }

    async fn read<T>(&self, id: BottleId, f: impl FnOnce(&Bottle) -> T) -> Result<T, EngineError> {
        self.bottles
            .read()
            .await
            .get(&id)
            .map(f)
            .ok_or(EngineError::UnknownBottle(id))
    }

    async fn write<T>(
        &self,
        id: BottleId,
        f: impl FnOnce(&mut Bottle) -> T,
    ) -> Result<T, EngineError> {
        self.bottles
            .write()
            .await
            .get_mut(&id)
            .map(f)
            .ok_or(EngineError::UnknownBottle(id))
    }

    /// Removes a bottle from the arena into the recently finished list.
    async fn retire(&self, id: BottleId) {
        let Some(bottle) = self.bottles.write().await.remove(&id) else {
            return;
        };
        debug!(bottle = %id, state = %bottle.state, "bottle retired");
        let mut finished = self.finished.write().await;
        if finished.len() >= self.finished_capacity {
            finished.pop_front();
        }
        finished.push_back(bottle);
    }

    /// Snapshot of a bottle, active or recently finished.
    pub async fn bottle(&self, id: BottleId) -> Option<Bottle> {
        if let Some(b) = self.bottles.read().await.get(&id) {
            return Some(b.clone());
        }
        self.finished
            .read()
            .await
            .iter()
            .rev()
            .find(|b| b.id == id)
            .cloned()
    }

    /// Snapshots of the active bottles, ordered by id.
    pub async fn bottles(&self) -> Vec<Bottle> {
        let mut out: Vec<Bottle> = self.bottles.read().await.values().cloned().collect();
        out.sort_by_key(|b| b.id);
        out
    }

    /// Recently retired bottles, oldest first.
    pub async fn finished(&self) -> Vec<Bottle> {
        self.finished.read().await.iter().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.bottles.read().await.len()
    }

    pub fn is_station_busy(&self, station: Station) -> bool {
        self.locks.is_busy(station)
    }

    pub fn station_occupant(&self, station: Station) -> Option<BottleId> {
        self.locks.occupant(station)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn status(&self) -> ProcessStatus {
        let bottles = self.bottles.read().await;
        let mut bottles_by_state = BTreeMap::new();
        for b in bottles.values() {
            *bottles_by_state.entry(b.state).or_insert(0) += 1;
        }
        ProcessStatus {
            active_bottles: bottles.len(),
            bottles_by_state,
            stations: Station::ALL
                .into_iter()
                .map(|s| (s, self.locks.occupant(s)))
                .collect(),
        }
    }
}
