use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use bottleline::{
    ActuatorCommand, Bottle, BottleId, BottleState, DeviceHandler, DeviceRegistry, EngineError,
    EventKind, LineConfig, LineContext, Operation, PlcRole, ProcessEngine, ProductionMetrics,
    ScadaMonitor, Station,
};

struct Line {
    ctx: LineContext,
    handler: Arc<DeviceHandler>,
    engine: Arc<ProcessEngine>,
}

async fn line(cfg: LineConfig) -> Line {
    let ctx = LineContext::in_memory(&cfg);
    let scada = ScadaMonitor::new(
        cfg.scada.clone(),
        Arc::clone(&ctx.variables),
        Arc::clone(&ctx.broker),
        ctx.bus.clone(),
    );
    let registry = Arc::new(DeviceRegistry::from_layout(&cfg.layout));
    let handler = Arc::new(DeviceHandler::new(&ctx, &cfg.simulation, registry, scada));
    handler.initialize().await.unwrap();
    let engine = Arc::new(ProcessEngine::new(
        &cfg,
        Arc::clone(&handler),
        ctx.bus.clone(),
        ProductionMetrics::default(),
    ));
    Line {
        ctx,
        handler,
        engine,
    }
}

fn bottle_at(n: u64, state: BottleState, position: f64) -> Bottle {
    let mut b = Bottle::new(BottleId::new(n));
    b.state = state;
    b.position = position;
    b
}

#[tokio::test(start_paused = true)]
async fn waiting_bottle_is_filled_within_the_station_timeout() {
    let line = line(LineConfig::default()).await;
    let id = line
        .engine
        .admit(bottle_at(0, BottleState::WaitingFill, 25.0))
        .await
        .unwrap();

    let token = CancellationToken::new();
    let started = Instant::now();
    assert!(line.engine.advance(id, &token).await.unwrap());
    let elapsed = started.elapsed();

    let b = line.engine.bottle(id).await.unwrap();
    assert_eq!(b.state, BottleState::Filled);
    assert!(b.fill_level >= 95.0 && b.fill_level <= 100.0, "{}", b.fill_level);
    assert!(elapsed <= Duration::from_secs_f64(4.5), "{elapsed:?}");
    assert!(elapsed >= Duration::from_millis(2500), "{elapsed:?}");

    assert_eq!(
        line.handler.plc(PlcRole::Filling).current_operation().await,
        Operation::FillComplete
    );
    let valve = line.handler.registry().actuator("filling_valve").await.unwrap();
    assert!(!valve.active);
    assert!(!line.engine.is_station_busy(Station::Filling));
}

#[tokio::test(start_paused = true)]
async fn silent_capping_plc_times_out_into_error_once() {
    let line = line(LineConfig::default()).await;
    line.handler.plc(PlcRole::Capping).set_fault(true).await;
    let id = line
        .engine
        .admit(bottle_at(3, BottleState::WaitingCap, 50.0))
        .await
        .unwrap();

    let token = CancellationToken::new();
    let started = Instant::now();
    let alive = line.engine.advance(id, &token).await.unwrap();
    let elapsed = started.elapsed();

    assert!(!alive);
    assert!(elapsed >= Duration::from_millis(1500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1600), "{elapsed:?}");

    let b = line.engine.bottle(id).await.unwrap();
    assert_eq!(b.state, BottleState::Error);
    assert!(b.error.as_deref().unwrap().contains("timeout"));
    assert!(!b.has_cap);

    let metrics = line.engine.metrics();
    assert_eq!(metrics.failed_bottles, 1);
    assert_eq!(metrics.station_timeouts, 1);

    // retired: a second advance cannot count it again
    assert!(matches!(
        line.engine.advance(id, &token).await,
        Err(EngineError::UnknownBottle(_))
    ));
    assert_eq!(line.engine.metrics().failed_bottles, 1);
    assert!(!line.engine.is_station_busy(Station::Capping));
}

#[tokio::test(start_paused = true)]
async fn filling_station_serves_one_bottle_at_a_time() {
    let line = line(LineConfig::default()).await;
    let mut rx = line.ctx.bus.subscribe();
    let a = line
        .engine
        .admit(bottle_at(0, BottleState::WaitingFill, 25.0))
        .await
        .unwrap();
    let b = line
        .engine
        .admit(bottle_at(1, BottleState::WaitingFill, 25.0))
        .await
        .unwrap();

    let token = CancellationToken::new();
    let started = Instant::now();
    let (ra, rb) = tokio::join!(
        line.engine.advance(a, &token),
        line.engine.advance(b, &token)
    );
    let elapsed = started.elapsed();

    assert!(ra.unwrap());
    assert!(rb.unwrap());
    for id in [a, b] {
        assert_eq!(line.engine.bottle(id).await.unwrap().state, BottleState::Filled);
    }
    // one fill is 28 ticks; two serialized fills cannot overlap
    assert!(elapsed >= Duration::from_millis(5500), "{elapsed:?}");

    let mut holder: Option<String> = None;
    let mut acquisitions = 0;
    while let Ok(ev) = rx.try_recv() {
        if ev.station != Some(Station::Filling) {
            continue;
        }
        let bottle = ev.bottle.as_deref().map(str::to_string);
        match ev.kind {
            EventKind::StationAcquired => {
                assert!(holder.is_none(), "filling acquired while held by {holder:?}");
                holder = bottle;
                acquisitions += 1;
            }
            EventKind::StationReleased => {
                assert_eq!(holder, bottle);
                holder = None;
            }
            _ => {}
        }
    }
    assert_eq!(acquisitions, 2);
    assert!(holder.is_none());
}

#[tokio::test(start_paused = true)]
async fn states_only_move_forward_until_the_bottle_leaves() {
    let line = line(LineConfig::default()).await;
    line.handler
        .handle_actuator_command("main_conveyor", ActuatorCommand::Activate)
        .await
        .unwrap();
    let mut rx = line.ctx.bus.subscribe();

    let id = line.engine.create_bottle().await;
    let token = CancellationToken::new();
    let mut units = 0;
    while line.engine.advance(id, &token).await.unwrap() {
        units += 1;
        assert!(units < 20, "bottle never left the line");
    }

    let mut states = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        if ev.kind == EventKind::BottleStateChanged && ev.bottle.as_deref() == Some("bottle_0") {
            states.push(ev.state.unwrap());
        }
    }
    assert_eq!(states.len(), 9, "{states:?}");
    assert_eq!(states.last(), Some(&BottleState::Completed));
    let mut prev = BottleState::New;
    for state in states {
        assert!(prev.can_transition_to(state), "{prev} -> {state}");
        assert_eq!(state.ordinal(), prev.ordinal().map(|o| o + 1));
        prev = state;
    }

    let done = line.engine.bottle(id).await.unwrap();
    assert_eq!(done.state, BottleState::Completed);
    assert!(done.has_cap && done.has_label);
    assert_eq!(done.position, 100.0);
    assert_eq!(line.engine.active_count().await, 0);

    let metrics = line.engine.metrics();
    assert_eq!(metrics.bottles_created, 1);
    assert_eq!(metrics.successful_bottles, 1);
    assert_eq!(metrics.failed_bottles, 0);
}

#[tokio::test(start_paused = true)]
async fn fill_level_never_decreases_and_stays_bounded() {
    let line = line(LineConfig::default()).await;
    let id = line
        .engine
        .admit(bottle_at(0, BottleState::WaitingFill, 25.0))
        .await
        .unwrap();

    let engine = Arc::clone(&line.engine);
    let token = CancellationToken::new();
    let unit = {
        let token = token.clone();
        tokio::spawn(async move { engine.advance(id, &token).await })
    };

    let mut levels = Vec::new();
    for _ in 0..200 {
        time::sleep(Duration::from_millis(50)).await;
        let b = line.engine.bottle(id).await.unwrap();
        levels.push(b.fill_level);
        if b.state == BottleState::Filled {
            break;
        }
    }
    assert!(unit.await.unwrap().unwrap());

    assert!(levels.len() > 10);
    assert!(levels.windows(2).all(|w| w[0] <= w[1]), "{levels:?}");
    assert!(levels.iter().all(|l| (0.0..=100.0).contains(l)));
    assert!(*levels.last().unwrap() >= 95.0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_fill_keeps_state_and_resumes() {
    let line = line(LineConfig::default()).await;
    let id = line
        .engine
        .admit(bottle_at(0, BottleState::WaitingFill, 25.0))
        .await
        .unwrap();

    let token = CancellationToken::new();
    let unit = {
        let engine = Arc::clone(&line.engine);
        let token = token.clone();
        tokio::spawn(async move { engine.advance(id, &token).await })
    };
    time::sleep(Duration::from_secs(1)).await;

    let cancelled_at = Instant::now();
    token.cancel();
    assert!(unit.await.unwrap().unwrap());
    assert!(cancelled_at.elapsed() <= Duration::from_millis(100));

    let paused = line.engine.bottle(id).await.unwrap();
    assert_eq!(paused.state, BottleState::Filling);
    assert!(paused.fill_level > 0.0 && paused.fill_level < 95.0);
    assert!(paused.error.is_none());
    assert!(!line.engine.is_station_busy(Station::Filling));

    let fresh = CancellationToken::new();
    assert!(line.engine.advance(id, &fresh).await.unwrap());
    let resumed = line.engine.bottle(id).await.unwrap();
    assert_eq!(resumed.state, BottleState::Filled);
    assert!(resumed.fill_level >= paused.fill_level);
    assert_eq!(line.engine.metrics().failed_bottles, 0);
}

#[tokio::test(start_paused = true)]
async fn stopped_conveyor_makes_no_progress() {
    let line = line(LineConfig::default()).await;
    let id = line.engine.create_bottle().await;

    let token = CancellationToken::new();
    assert!(line.engine.advance(id, &token).await.unwrap());

    let b = line.engine.bottle(id).await.unwrap();
    assert_eq!(b.state, BottleState::New);
    assert_eq!(b.position, 0.0);
}

#[tokio::test]
async fn unknown_and_duplicate_bottles_are_engine_errors() {
    let line = line(LineConfig::default()).await;
    let token = CancellationToken::new();

    let err = line
        .engine
        .advance(BottleId::new(42), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownBottle(_)));
    assert!(!err.is_retryable());

    let id = line.engine.create_bottle().await;
    let dup = line.engine.admit(Bottle::new(id)).await.unwrap_err();
    assert!(matches!(dup, EngineError::DuplicateBottle(_)));
    assert!(dup.is_retryable());

    // ids keep increasing past admitted ones
    line.engine
        .admit(bottle_at(10, BottleState::WaitingCap, 50.0))
        .await
        .unwrap();
    assert_eq!(line.engine.create_bottle().await, BottleId::new(11));
}
