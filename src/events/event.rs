//! # Line events emitted by the factory, the process engine and the SCADA monitor.
//!
//! The [`EventKind`] enum classifies events across four categories:
//! - **Line lifecycle**: factory started/stopped, shutdown, grace exceeded
//! - **Bottle flow**: bottle added, state changed, completed, failed
//! - **Stations**: lock acquired/released, phase timeout
//! - **Supervision**: alarms raised/acknowledged, routing failures, subscriber health
//!
//! The [`Event`] struct carries optional metadata (bottle id, station, state,
//! device, alarm id, reason, timeout) depending on the kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use bottleline::{BottleState, Event, EventKind, Station};
//!
//! let ev = Event::new(EventKind::StationTimeout)
//!     .with_bottle("bottle_7")
//!     .with_station(Station::Capping)
//!     .with_state(BottleState::Error)
//!     .with_timeout(Duration::from_millis(1500));
//!
//! assert_eq!(ev.kind, EventKind::StationTimeout);
//! assert_eq!(ev.bottle.as_deref(), Some("bottle_7"));
//! assert_eq!(ev.timeout_ms, Some(1500));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::process::{BottleState, Station};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of line events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `device` (subscriber name), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `device` (subscriber name), `reason` ("full" / "closed").
    SubscriberOverflow,

    // === Line lifecycle ===
    /// Line loops were spawned.
    FactoryStarted,

    /// Stop was requested (OS signal or explicit `stop()`).
    ShutdownRequested,

    /// All loops exited within the grace period.
    FactoryStopped,

    /// Grace period exceeded; some loops did not exit in time.
    ///
    /// Sets: `reason` (stuck loop names), `timeout_ms` (grace).
    GraceExceeded,

    // === Bottle flow ===
    /// A new bottle entered the line.
    ///
    /// Sets: `bottle`, `state` (`New`).
    BottleAdded,

    /// A bottle moved to a new state.
    ///
    /// Sets: `bottle`, `state` (the new state), `station` when inside a station phase.
    BottleStateChanged,

    /// A bottle left the line completed.
    ///
    /// Sets: `bottle`.
    BottleCompleted,

    /// A bottle was routed to `ERROR`.
    ///
    /// Sets: `bottle`, `station`, `reason` (message recorded on the bottle).
    BottleFailed,

    /// A work unit hit an engine-level error; the bottle will be retried.
    ///
    /// Sets: `bottle`, `reason`, `delay_ms`.
    BottleRetryScheduled,

    // === Stations ===
    /// A bottle acquired a station lock.
    ///
    /// Sets: `bottle`, `station`.
    StationAcquired,

    /// A station lock was released.
    ///
    /// Sets: `bottle`, `station`.
    StationReleased,

    /// A station phase exceeded its timeout.
    ///
    /// Sets: `bottle`, `station`, `timeout_ms`.
    StationTimeout,

    // === Supervision ===
    /// The SCADA monitor created an alarm.
    ///
    /// Sets: `alarm` (id), `device`, `reason` (alarm message).
    AlarmRaised,

    /// An alarm was acknowledged.
    ///
    /// Sets: `alarm` (id).
    AlarmAcknowledged,

    /// A sensor/actuator event could not be routed to a PLC.
    ///
    /// Sets: `device`, `reason`.
    RoutingFailed,
}

/// Line event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Bottle id, if applicable.
    pub bottle: Option<Arc<str>>,
    /// Station, if applicable.
    pub station: Option<Station>,
    /// Bottle state, if applicable.
    pub state: Option<BottleState>,
    /// Device or subscriber name, if applicable.
    pub device: Option<Arc<str>>,
    /// Alarm id, if applicable.
    pub alarm: Option<Arc<str>>,
    /// Human-readable reason (errors, alarm text, overflow details).
    pub reason: Option<Arc<str>>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Retry delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            bottle: None,
            station: None,
            state: None,
            device: None,
            alarm: None,
            reason: None,
            timeout_ms: None,
            delay_ms: None,
        }
    }

    /// Attaches a bottle id.
    #[inline]
    pub fn with_bottle(mut self, bottle: impl Into<Arc<str>>) -> Self {
        self.bottle = Some(bottle.into());
        self
    }

    /// Attaches a station.
    #[inline]
    pub fn with_station(mut self, station: Station) -> Self {
        self.station = Some(station);
        self
    }

    /// Attaches a bottle state.
    #[inline]
    pub fn with_state(mut self, state: BottleState) -> Self {
        self.state = Some(state);
        self
    }

    /// Attaches a device (or subscriber) name.
    #[inline]
    pub fn with_device(mut self, device: impl Into<Arc<str>>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Attaches an alarm id.
    #[inline]
    pub fn with_alarm(mut self, alarm: impl Into<Arc<str>>) -> Self {
        self.alarm = Some(alarm.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_device(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_device(subscriber)
            .with_reason(info)
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::BottleAdded);
        let b = Event::new(EventKind::BottleAdded);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn durations_are_compacted_to_millis() {
        let ev = Event::new(EventKind::GraceExceeded)
            .with_timeout(Duration::from_secs(u64::MAX))
            .with_delay(Duration::from_millis(250));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
        assert_eq!(ev.delay_ms, Some(250));
    }
}
