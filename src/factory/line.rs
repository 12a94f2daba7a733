//! # Factory: the line loop, lifecycle and status.
//!
//! The [`Factory`] owns the bottle FIFO (ids only) and drives the
//! [`ProcessEngine`] one unit of work per bottle at a time.
//!
//! ## Line loop (every tick)
//! ```text
//!   ├─► inject a bottle every bottle_interval  ──► FIFO
//!   ├─► due retries                             ──► FIFO
//!   ├─► refresh line sensors (proximity by position, level_filling)
//!   ├─► republish actuator states
//!   ├─► PLC scan (timers)
//!   ├─► dispatch: FIFO ──► JoinSet { engine.advance(id, token) }
//!   └─► until next tick, settle finished units:
//!          Ok(true)                 ─► back into the FIFO
//!          Ok(false)                ─► retired, dropped
//!          Err(retryable)           ─► BackoffPolicy delay, then FIFO
//!          Err(non-retryable)       ─► ERROR, retired (also after max_retries)
//! ```
//!
//! ## Lifecycle
//! ```text
//! start(): initialize ─► conveyor on ─► spawn {line, scada} ─► FactoryStarted
//! stop():  ShutdownRequested ─► cancel ─► actuators off ─► wait(grace)
//!            ├─ all joined  ─► FactoryStopped
//!            └─ timeout     ─► GraceExceeded (stuck loop names)
//! ```
//!
//! ## Rules
//! - Only the line loop dequeues/requeues; an id is in at most one work unit.
//! - A unit keeps its bottle until it returns; cancelling the run token ends
//!   every unit within one tick, and the loop drains them before exiting.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LineConfig;
use crate::context::LineContext;
use crate::devices::{ActuatorCommand, DeviceHandler, PlcRole, SensorValue};
use crate::error::{EngineError, FactoryError, InitError};
use crate::events::{Event, EventKind};
use crate::factory::builder::FactoryBuilder;
use crate::factory::status::{
    CappingStatus, FactoryStatus, FillingStatus, LabelingStatus, StationsStatus,
};
use crate::process::{BottleId, BottleState, ProcessEngine, ProductionMetrics, Station};
use crate::scada::ScadaMonitor;
use crate::subscribers::SubscriberSet;

type Joined = Result<(BottleId, Result<bool, EngineError>), JoinError>;

/// Names of loops that have not exited yet.
#[derive(Default)]
struct LoopTracker {
    names: StdMutex<BTreeSet<&'static str>>,
}

struct LoopGuard {
    tracker: Arc<LoopTracker>,
    name: &'static str,
}

impl LoopTracker {
    fn enter(self: &Arc<Self>, name: &'static str) -> LoopGuard {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name);
        LoopGuard {
            tracker: Arc::clone(self),
            name,
        }
    }

    fn snapshot(&self) -> Vec<String> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|n| (*n).to_string())
            .collect()
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.tracker
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.name);
    }
}

/// One started run of the line.
struct Run {
    token: CancellationToken,
    loops: JoinSet<()>,
}

/// One bottling line.
pub struct Factory {
    cfg: LineConfig,
    ctx: LineContext,
    scada: Arc<ScadaMonitor>,
    handler: Arc<DeviceHandler>,
    engine: Arc<ProcessEngine>,
    metrics: ProductionMetrics,
    subs: Arc<SubscriberSet>,
    init: OnceCell<()>,
    run: Mutex<Option<Run>>,
    running: AtomicBool,
    alive: Arc<LoopTracker>,
}

impl Factory {
    /// Returns a builder over `cfg`.
    pub fn builder(cfg: LineConfig) -> FactoryBuilder {
        FactoryBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: LineConfig,
        ctx: LineContext,
        scada: Arc<ScadaMonitor>,
        handler: Arc<DeviceHandler>,
        engine: Arc<ProcessEngine>,
        metrics: ProductionMetrics,
        subs: Arc<SubscriberSet>,
    ) -> Self {
        Self {
            cfg,
            ctx,
            scada,
            handler,
            engine,
            metrics,
            subs,
            init: OnceCell::new(),
            run: Mutex::new(None),
            running: AtomicBool::new(false),
            alive: Arc::new(LoopTracker::default()),
        }
    }

    pub fn config(&self) -> &LineConfig {
        &self.cfg
    }

    pub fn context(&self) -> &LineContext {
        &self.ctx
    }

    pub fn engine(&self) -> &Arc<ProcessEngine> {
        &self.engine
    }

    pub fn handler(&self) -> &Arc<DeviceHandler> {
        &self.handler
    }

    pub fn scada(&self) -> &Arc<ScadaMonitor> {
        &self.scada
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Initializes the PLCs and the SCADA subscriptions. Runs once; later
    /// calls return the first outcome's success without redoing the work.
    pub async fn initialize(&self) -> Result<(), InitError> {
        self.init
            .get_or_try_init(|| async {
                self.handler.initialize().await?;
                self.scada.subscribe().await?;
                info!("factory initialized");
                Ok::<(), InitError>(())
            })
            .await
            .map(|_| ())
    }

    /// Starts the line loop and the SCADA loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), FactoryError> {
        let mut slot = self.run.lock().await;
        if slot.is_some() {
            return Err(FactoryError::AlreadyRunning);
        }
        self.initialize().await?;

        if let Err(e) = self
            .handler
            .handle_actuator_command(PlcRole::Conveyor.actuator_id(), ActuatorCommand::Activate)
            .await
        {
            warn!(error = %e, "conveyor could not be started");
        }

        let token = CancellationToken::new();
        let mut loops = JoinSet::new();

        let line = Arc::clone(self);
        self.spawn_loop(&mut loops, "line", line.line_loop(token.child_token()));

        let scada = Arc::clone(&self.scada);
        let scada_token = token.child_token();
        self.spawn_loop(&mut loops, "scada", async move { scada.run(scada_token).await });

        *slot = Some(Run { token, loops });
        self.running.store(true, Ordering::Release);
        self.ctx.bus.publish(Event::new(EventKind::FactoryStarted));
        info!(
            speed = self.cfg.simulation.speed(),
            bottle_interval = self.cfg.simulation.bottle_interval,
            "factory started"
        );
        Ok(())
    }

    /// Stops the line; a no-op when it is not running.
    pub async fn stop(&self) -> Result<(), FactoryError> {
        let Some(Run { token, mut loops }) = self.run.lock().await.take() else {
            return Ok(());
        };
        self.ctx.bus.publish(Event::new(EventKind::ShutdownRequested));
        info!("factory stopping");
        token.cancel();
        self.running.store(false, Ordering::Release);

        for actuator_id in self.handler.registry().deactivate_all().await {
            if let Err(e) = self.handler.publish_actuator(&actuator_id).await {
                warn!(actuator_id, error = %e, "actuator stop not published");
            }
        }

        let Some(grace) = self.cfg.grace_period() else {
            loops.detach_all();
            self.ctx.bus.publish(Event::new(EventKind::FactoryStopped));
            return Ok(());
        };
        let done = async { while loops.join_next().await.is_some() {} };
        match time::timeout(grace, done).await {
            Ok(()) => {
                self.ctx.bus.publish(Event::new(EventKind::FactoryStopped));
                info!("factory stopped");
                Ok(())
            }
            Err(_) => {
                let stuck = self.alive.snapshot();
                self.ctx.bus.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_reason(stuck.join(","))
                        .with_timeout(grace),
                );
                loops.abort_all();
                error!(?grace, ?stuck, "factory stop exceeded grace period");
                Err(FactoryError::GraceExceeded { grace, stuck })
            }
        }
    }

    pub async fn status(&self) -> FactoryStatus {
        let registry = self.handler.registry();
        let level = registry
            .sensor("level_filling")
            .await
            .and_then(|r| r.value.level())
            .unwrap_or(0.0);
        let valve_active = registry
            .actuator(PlcRole::Filling.actuator_id())
            .await
            .is_some_and(|a| a.active);
        let actuator_active = registry
            .actuator(PlcRole::Capping.actuator_id())
            .await
            .is_some_and(|a| a.active);
        let motor_speed = registry
            .actuator(PlcRole::Labeling.actuator_id())
            .await
            .and_then(|a| a.speed)
            .unwrap_or(0.0);

        FactoryStatus {
            running: self.is_running(),
            bottles_produced: self.metrics.snapshot().bottles_created,
            bottles_in_progress: self.engine.active_count().await,
            stations: StationsStatus {
                filling: FillingStatus {
                    busy: self.engine.is_station_busy(Station::Filling),
                    occupant: self.engine.station_occupant(Station::Filling),
                    level,
                    valve_active,
                },
                capping: CappingStatus {
                    busy: self.engine.is_station_busy(Station::Capping),
                    occupant: self.engine.station_occupant(Station::Capping),
                    actuator_active,
                },
                labeling: LabelingStatus {
                    busy: self.engine.is_station_busy(Station::Labeling),
                    occupant: self.engine.station_occupant(Station::Labeling),
                    motor_speed,
                },
            },
            conveyor_speed: registry.conveyor_speed().await,
            metrics: self.metrics.snapshot(),
            plcs: self.handler.plc_snapshots().await,
            scada: self.scada.status().await,
        }
    }

    /// Forwards bus events to the subscriber set (fire-and-forget).
    pub(crate) fn subscriber_listener(&self) {
        if self.subs.is_empty() {
            return;
        }
        let mut rx = self.ctx.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(Arc::new(ev)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_loop<F>(&self, loops: &mut JoinSet<()>, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.alive.enter(name);
        loops.spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }

    async fn line_loop(self: Arc<Self>, token: CancellationToken) {
        let sim = &self.cfg.simulation;
        // bottles interrupted by an earlier stop resume where they were
        let mut queue: VecDeque<BottleId> = self
            .engine
            .bottles()
            .await
            .into_iter()
            .map(|b| b.id)
            .collect();
        let mut units: JoinSet<(BottleId, Result<bool, EngineError>)> = JoinSet::new();
        let mut errors: HashMap<BottleId, u32> = HashMap::new();
        let mut delayed: Vec<(Instant, BottleId)> = Vec::new();
        let mut next_bottle = Instant::now();

        info!(tick = ?sim.tick(), resumed = queue.len(), "line loop started");
        'line: loop {
            let now = Instant::now();
            if now >= next_bottle {
                let id = self.engine.create_bottle().await;
                queue.push_back(id);
                next_bottle = now + sim.bottle_every();
                self.handler.sync_plc_variables().await;
            }
            delayed.retain(|&(due, id)| {
                if due <= now {
                    queue.push_back(id);
                    false
                } else {
                    true
                }
            });

            self.refresh_sensors().await;
            self.refresh_actuators().await;
            self.handler.scan().await;

            while let Some(id) = queue.pop_front() {
                let engine = Arc::clone(&self.engine);
                let unit_token = token.child_token();
                units.spawn(async move {
                    let outcome = engine.advance(id, &unit_token).await;
                    (id, outcome)
                });
            }
            self.metrics.record_in_flight(units.len() as u64);

            let tick = time::sleep(sim.tick());
            tokio::pin!(tick);
            loop {
                select! {
                    biased;
                    _ = token.cancelled() => break 'line,
                    _ = &mut tick => break,
                    Some(joined) = units.join_next() => {
                        self.settle(joined, &mut queue, &mut errors, &mut delayed).await;
                    }
                }
            }
        }

        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "work unit aborted during shutdown");
            }
        }
        info!(
            queued = queue.len() + delayed.len(),
            "line loop stopped"
        );
    }

    /// Routes a finished work unit back into the FIFO, the retry list, or out
    /// of the pipeline.
    async fn settle(
        &self,
        joined: Joined,
        queue: &mut VecDeque<BottleId>,
        errors: &mut HashMap<BottleId, u32>,
        delayed: &mut Vec<(Instant, BottleId)>,
    ) {
        let (id, outcome) = match joined {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "work unit panicked; bottle dropped");
                return;
            }
        };
        match outcome {
            Ok(true) => {
                errors.remove(&id);
                queue.push_back(id);
            }
            Ok(false) => {
                errors.remove(&id);
                debug!(bottle = %id, "bottle left the pipeline");
            }
            Err(e)
                if e.is_retryable()
                    && errors.get(&id).is_none_or(|n| *n < self.cfg.max_retries) =>
            {
                let attempt = errors.entry(id).or_insert(0);
                let delay: Duration = self.cfg.retry.next(*attempt);
                *attempt = attempt.saturating_add(1);
                warn!(bottle = %id, label = e.as_label(), ?delay, "{e}; retrying");
                self.ctx.bus.publish(
                    Event::new(EventKind::BottleRetryScheduled)
                        .with_bottle(id.to_string())
                        .with_reason(e.to_string())
                        .with_delay(delay),
                );
                delayed.push((Instant::now() + delay, id));
            }
            Err(e) => {
                let attempts = errors.remove(&id).unwrap_or(0);
                error!(bottle = %id, label = e.as_label(), attempts, "{e}; bottle abandoned");
                if let Err(gone) = self.engine.abandon(id, &e.to_string()).await {
                    debug!(bottle = %id, error = %gone, "abandoned bottle already gone");
                }
            }
        }
    }

    /// Republishes every actuator's current state so monitoring sees it as live.
    async fn refresh_actuators(&self) {
        for actuator_id in self.handler.registry().actuator_ids().await {
            if let Err(e) = self.handler.publish_actuator(&actuator_id).await {
                warn!(actuator_id, error = %e, "actuator refresh failed");
            }
        }
    }

    /// Publishes line sensor readings derived from bottle positions.
    ///
    /// Station proximity sensors are left alone: they belong to the handshake.
    async fn refresh_sensors(&self) {
        let bottles = self.engine.bottles().await;
        let range = self.cfg.layout.detection_range;

        for (sensor_id, position) in self.handler.registry().proximity_sensors().await {
            if self.handler.route_sensor(&sensor_id).is_ok() {
                continue;
            }
            let detected = bottles
                .iter()
                .any(|b| (b.position - position).abs() <= range);
            if let Err(e) = self
                .handler
                .publish_sensor(&sensor_id, SensorValue::Detected(detected))
                .await
            {
                warn!(sensor_id, error = %e, "sensor refresh failed");
            }
        }

        let level = bottles
            .iter()
            .find(|b| b.state == BottleState::Filling)
            .map_or(0.0, |b| b.fill_level);
        if let Err(e) = self
            .handler
            .publish_sensor("level_filling", SensorValue::Level(level))
            .await
        {
            warn!(error = %e, "level refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Settling {
        queue: VecDeque<BottleId>,
        errors: HashMap<BottleId, u32>,
        delayed: Vec<(Instant, BottleId)>,
    }

    impl Settling {
        fn new() -> Self {
            Self {
                queue: VecDeque::new(),
                errors: HashMap::new(),
                delayed: Vec::new(),
            }
        }

        async fn settle(
            &mut self,
            factory: &Factory,
            id: BottleId,
            outcome: Result<bool, EngineError>,
        ) {
            let joined = Ok((id, outcome));
            factory
                .settle(joined, &mut self.queue, &mut self.errors, &mut self.delayed)
                .await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_is_delayed_and_others_abandon_the_bottle() {
        let factory = Factory::builder(LineConfig::default()).build();
        let mut rx = factory.context().bus.subscribe();
        let mut s = Settling::new();

        let id = factory.engine().create_bottle().await;
        s.settle(&factory, id, Err(EngineError::DuplicateBottle(id)))
            .await;
        assert!(s.queue.is_empty());
        assert_eq!(s.delayed.len(), 1);
        assert_eq!(s.delayed[0].1, id);
        assert_eq!(s.errors.get(&id), Some(&1));

        let stuck = EngineError::InvalidTransition {
            id,
            from: BottleState::New,
            to: BottleState::Capped,
        };
        s.settle(&factory, id, Err(stuck)).await;
        assert!(s.queue.is_empty());
        assert_eq!(s.delayed.len(), 1);
        assert!(s.errors.is_empty());

        let b = factory.engine().bottle(id).await.unwrap();
        assert_eq!(b.state, BottleState::Error);
        let message = b.error.unwrap();
        assert!(message.starts_with("abandoned:"), "{message}");
        assert!(message.contains("illegal transition"), "{message}");
        assert_eq!(factory.engine().active_count().await, 0);
        assert_eq!(factory.engine().metrics().failed_bottles, 1);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::BottleRetryScheduled));
        assert!(kinds.contains(&EventKind::BottleFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_the_configured_limit() {
        let factory = Factory::builder(LineConfig {
            max_retries: 2,
            ..LineConfig::default()
        })
        .build();
        let mut s = Settling::new();
        let id = factory.engine().create_bottle().await;

        for _ in 0..2 {
            s.settle(&factory, id, Err(EngineError::DuplicateBottle(id)))
                .await;
        }
        assert_eq!(s.delayed.len(), 2);
        assert_eq!(factory.engine().active_count().await, 1);

        s.settle(&factory, id, Err(EngineError::DuplicateBottle(id)))
            .await;
        assert_eq!(s.delayed.len(), 2);
        assert_eq!(
            factory.engine().bottle(id).await.unwrap().state,
            BottleState::Error
        );
    }

    #[tokio::test]
    async fn finished_units_requeue_or_leave() {
        let factory = Factory::builder(LineConfig::default()).build();
        let mut s = Settling::new();

        let a = factory.engine().create_bottle().await;
        let b = factory.engine().create_bottle().await;
        s.settle(&factory, a, Ok(true)).await;
        s.settle(&factory, b, Ok(false)).await;
        let gone = BottleId::new(99);
        s.settle(&factory, gone, Err(EngineError::UnknownBottle(gone)))
            .await;

        assert_eq!(s.queue, [a]);
        assert!(s.delayed.is_empty());
        assert_eq!(factory.engine().metrics().failed_bottles, 0);
    }
}
