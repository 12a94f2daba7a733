use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time;
use tokio_util::sync::CancellationToken;

use bottleline::{
    ALARM_TOPIC, ActuatorState, AlarmKind, LineConfig, LineContext, MessageBroker, ScadaConfig,
    ScadaError, ScadaMonitor, SensorValue, Severity, TopicHandler,
};

#[derive(Default)]
struct Collect {
    seen: Mutex<Vec<Value>>,
}

#[async_trait]
impl TopicHandler for Collect {
    async fn on_message(&self, _topic: &str, payload: &Value) {
        self.seen.lock().unwrap().push(payload.clone());
    }
}

fn monitor(scada: ScadaConfig) -> (Arc<ScadaMonitor>, LineContext) {
    let ctx = LineContext::in_memory(&LineConfig::default());
    let monitor = ScadaMonitor::new(
        scada,
        Arc::clone(&ctx.variables),
        Arc::clone(&ctx.broker),
        ctx.bus.clone(),
    );
    (monitor, ctx)
}

#[tokio::test(start_paused = true)]
async fn high_level_raises_one_alarm_per_scan() {
    let (scada, ctx) = monitor(ScadaConfig::default());
    let published = Arc::new(Collect::default());
    ctx.broker
        .subscribe(ALARM_TOPIC, published.clone())
        .await
        .unwrap();

    scada
        .record_sensor("level_filling", SensorValue::Level(96.0))
        .await;

    for scan in 1..=3 {
        let raised = scada.scan().await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, AlarmKind::HighLevel);
        assert_eq!(raised[0].severity, Severity::Warning);
        assert_eq!(raised[0].device_id, "level_filling");
        assert_eq!(scada.alarms().await.len(), scan);
    }

    let published = published.seen.lock().unwrap().clone();
    assert_eq!(published.len(), 3);
    assert_eq!(published[0]["type"], "HIGH_LEVEL");
}

#[tokio::test(start_paused = true)]
async fn monitor_loop_scans_every_interval_until_cancelled() {
    let (scada, _ctx) = monitor(ScadaConfig::default());
    scada
        .record_sensor("level_filling", SensorValue::Level(96.0))
        .await;

    let token = CancellationToken::new();
    let run = {
        let scada = Arc::clone(&scada);
        let token = token.clone();
        tokio::spawn(async move { scada.run(token).await })
    };

    // scans at 0s, 1s, 2s and 3s
    time::sleep(Duration::from_millis(3500)).await;
    assert!(scada.status().await.running);
    token.cancel();
    run.await.unwrap();

    let alarms = scada.alarms().await;
    assert_eq!(alarms.len(), 4);
    assert!(alarms.iter().all(|a| a.kind == AlarmKind::HighLevel));
    assert!(!scada.status().await.running);
}

#[tokio::test(start_paused = true)]
async fn values_inside_the_band_raise_nothing() {
    let (scada, _ctx) = monitor(ScadaConfig::default());
    scada
        .record_sensor("level_filling", SensorValue::Level(50.0))
        .await;
    scada
        .record_sensor("proximity_entry", SensorValue::Detected(false))
        .await;

    assert!(scada.scan().await.is_empty());
    assert_eq!(scada.status().await.device_count, 2);
}

#[tokio::test]
async fn acknowledging_twice_changes_nothing() {
    let (scada, _ctx) = monitor(ScadaConfig::default());
    scada
        .record_sensor("level_filling", SensorValue::Level(2.0))
        .await;
    let raised = scada.scan().await;
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].kind, AlarmKind::LowLevel);
    let id = raised[0].id.clone();

    assert_eq!(scada.active_alarms().await.len(), 1);
    assert!(scada.acknowledge_alarm(&id).await.unwrap());
    let after_first = scada.alarms().await;

    assert!(!scada.acknowledge_alarm(&id).await.unwrap());
    assert_eq!(scada.alarms().await, after_first);
    assert!(scada.active_alarms().await.is_empty());
    assert_eq!(scada.status().await.unacknowledged_alarms, 0);

    assert!(matches!(
        scada.acknowledge_alarm("ALM-999999").await,
        Err(ScadaError::UnknownAlarm(_))
    ));
}

#[tokio::test]
async fn alarm_history_keeps_the_newest_entries() {
    let (scada, _ctx) = monitor(ScadaConfig {
        alarm_capacity: 3,
        ..ScadaConfig::default()
    });
    scada
        .record_sensor("level_filling", SensorValue::Level(99.0))
        .await;
    for _ in 0..5 {
        scada.scan().await;
    }

    let ids: Vec<String> = scada.alarms().await.into_iter().map(|a| a.id).collect();
    assert_eq!(ids, ["ALM-000003", "ALM-000004", "ALM-000005"]);
}

#[tokio::test(start_paused = true)]
async fn speeding_motor_raises_a_critical_alarm() {
    let (scada, _ctx) = monitor(ScadaConfig {
        max_motor_speed: 0.5,
        ..ScadaConfig::default()
    });
    let state = ActuatorState {
        actuator_id: "main_conveyor".into(),
        kind: "conveyor_motor".into(),
        active: true,
        speed: Some(1.0),
        max_speed: Some(1.0),
        last_activation: None,
    };
    scada.record_actuator(&state).await;

    let raised = scada.scan().await;
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].kind, AlarmKind::HighSpeed);
    assert_eq!(raised[0].severity, Severity::Critical);
}
