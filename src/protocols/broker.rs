//! # Message broker (MQTT-like).
//!
//! Topics are `/`-separated levels. Subscription filters support the two
//! MQTT wildcards:
//! - `+` matches exactly one level (`factory/+/level_filling`);
//! - `#` matches any number of trailing levels, including none (`factory/sensors/#`).
//!
//! [`MemoryBroker`] delivers synchronously: `publish` awaits every matching
//! handler before returning. Handlers must not publish on a topic they are
//! subscribed to.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::ProtocolError;
use crate::protocols::monitor::{Protocol, ProtocolMonitor};

/// Receiver of broker messages.
#[async_trait]
pub trait TopicHandler: Send + Sync + 'static {
    async fn on_message(&self, topic: &str, payload: &Value);
}

/// Abstract publish/subscribe.
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Publishes `payload` on a concrete topic (no wildcards).
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), ProtocolError>;

    /// Registers `handler` for every topic matching `pattern`.
    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), ProtocolError>;
}

/// Checks a subscription filter: non-empty levels, wildcards occupy a whole
/// level, `#` only last.
pub fn validate_filter(pattern: &str) -> Result<(), ProtocolError> {
    let invalid = || ProtocolError::InvalidTopic(pattern.to_string());
    if pattern.is_empty() {
        return Err(invalid());
    }
    let levels: Vec<&str> = pattern.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let wild = level.contains('+') || level.contains('#');
        if wild && level.len() != 1 {
            return Err(invalid());
        }
        if *level == "#" && i + 1 != levels.len() {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Whether `topic` matches the filter `pattern`.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pat = pattern.split('/');
    let mut top = topic.split('/');
    loop {
        match (pat.next(), top.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// In-process broker.
pub struct MemoryBroker {
    subscriptions: RwLock<Vec<(String, Arc<dyn TopicHandler>)>>,
    monitor: Option<Arc<ProtocolMonitor>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            monitor: None,
        }
    }

    /// Records every publish/subscribe on `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<ProtocolMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), ProtocolError> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(ProtocolError::InvalidTopic(topic.to_string()));
        }
        if let Some(m) = &self.monitor {
            m.record(Protocol::Mqtt, "line", topic, "publish", payload.clone());
        }

        let targets: Vec<Arc<dyn TopicHandler>> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, topic))
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in targets {
            handler.on_message(topic, &payload).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), ProtocolError> {
        validate_filter(pattern)?;
        if let Some(m) = &self.monitor {
            m.record(Protocol::Mqtt, "line", pattern, "subscribe", Value::Null);
        }
        self.subscriptions
            .write()
            .await
            .push((pattern.to_string(), handler));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("factory/sensors/#", "factory/sensors/level_filling"));
        assert!(topic_matches("factory/sensors/#", "factory/sensors"));
        assert!(topic_matches("factory/+/level_filling", "factory/sensors/level_filling"));
        assert!(!topic_matches("factory/+", "factory/sensors/level_filling"));
        assert!(!topic_matches("factory/actuators/#", "factory/sensors/x"));
        assert!(topic_matches("factory/alarms", "factory/alarms"));
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert!(validate_filter("factory/#/x").is_err());
        assert!(validate_filter("factory/sen+").is_err());
        assert!(validate_filter("").is_err());
        assert!(validate_filter("factory/+/#").is_ok());
    }

    #[derive(Default)]
    struct Inbox(Mutex<Vec<(String, Value)>>);

    #[async_trait]
    impl TopicHandler for Inbox {
        async fn on_message(&self, topic: &str, payload: &Value) {
            self.0.lock().unwrap().push((topic.to_string(), payload.clone()));
        }
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscribers_only() {
        let broker = MemoryBroker::new();
        let sensors = Arc::new(Inbox::default());
        let alarms = Arc::new(Inbox::default());
        broker.subscribe("factory/sensors/#", sensors.clone()).await.unwrap();
        broker.subscribe("factory/alarms", alarms.clone()).await.unwrap();

        broker
            .publish("factory/sensors/level_filling", json!(42.0))
            .await
            .unwrap();

        assert_eq!(sensors.0.lock().unwrap().len(), 1);
        assert!(alarms.0.lock().unwrap().is_empty());
        assert!(broker.publish("factory/#", json!(1)).await.is_err());
    }
}
