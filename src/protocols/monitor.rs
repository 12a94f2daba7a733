//! # Protocol traffic monitor.
//!
//! [`ProtocolMonitor`] records every register, variable and broker operation
//! performed by the in-memory protocol stores. The log is a ring buffer; the
//! per-protocol counters in [`ProtocolSummary`] cover the whole lifetime.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;

/// Protocol family an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Register access.
    Modbus,
    /// Topic publish/subscribe.
    Mqtt,
    /// Named variables.
    #[serde(rename = "opcua")]
    OpcUa,
}

/// One recorded protocol operation.
#[derive(Clone, Debug, Serialize)]
pub struct ProtocolEvent {
    pub at: SystemTime,
    pub protocol: Protocol,
    pub source: String,
    pub destination: String,
    pub event_type: &'static str,
    pub data: Value,
}

/// Lifetime event counts per protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolSummary {
    pub modbus_events: u64,
    pub mqtt_events: u64,
    pub opcua_events: u64,
}

/// Bounded log of protocol traffic.
#[derive(Debug)]
pub struct ProtocolMonitor {
    capacity: usize,
    events: Mutex<VecDeque<ProtocolEvent>>,
    modbus: AtomicU64,
    mqtt: AtomicU64,
    opcua: AtomicU64,
}

impl ProtocolMonitor {
    /// Creates a monitor keeping at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            modbus: AtomicU64::new(0),
            mqtt: AtomicU64::new(0),
            opcua: AtomicU64::new(0),
        }
    }

    /// Appends an event, dropping the oldest one when full.
    pub fn record(
        &self,
        protocol: Protocol,
        source: impl Into<String>,
        destination: impl Into<String>,
        event_type: &'static str,
        data: Value,
    ) {
        let counter = match protocol {
            Protocol::Modbus => &self.modbus,
            Protocol::Mqtt => &self.mqtt,
            Protocol::OpcUa => &self.opcua,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let ev = ProtocolEvent {
            at: SystemTime::now(),
            protocol,
            source: source.into(),
            destination: destination.into(),
            event_type,
            data,
        };
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(ev);
    }

    /// Most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ProtocolEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Lifetime counters.
    pub fn summary(&self) -> ProtocolSummary {
        ProtocolSummary {
            modbus_events: self.modbus.load(Ordering::Relaxed),
            mqtt_events: self.mqtt.load(Ordering::Relaxed),
            opcua_events: self.opcua.load(Ordering::Relaxed),
        }
    }
}

impl Default for ProtocolMonitor {
    fn default() -> Self {
        Self::new(1000)
    }
}
