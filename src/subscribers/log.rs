//! # LogWriter: renders line events through `tracing`.
//!
//! The built-in subscriber. Bottle flow is logged at `debug`, failures and
//! alarms at `warn`, subscriber trouble at `error`.
//!
//! ## Example output
//! ```text
//! DEBUG bottleline::subscribers::log: bottle added bottle="bottle_3"
//! DEBUG bottleline::subscribers::log: station acquired bottle="bottle_3" station=filling
//!  WARN bottleline::subscribers::log: station timeout bottle="bottle_3" station=capping timeout_ms=1500
//!  WARN bottleline::subscribers::log: alarm raised alarm="ALM-000004" device="level_filling" reason="High level detected: 97.5%"
//!  INFO bottleline::subscribers::log: factory stopped
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let bottle = e.bottle.as_deref().unwrap_or("-");
        let station = e.station.map(|s| s.as_str()).unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::FactoryStarted => info!(seq = e.seq, "factory started"),
            EventKind::ShutdownRequested => info!(seq = e.seq, "shutdown requested"),
            EventKind::FactoryStopped => info!(seq = e.seq, "factory stopped"),
            EventKind::GraceExceeded => {
                warn!(stuck = reason, grace_ms = ?e.timeout_ms, "grace exceeded")
            }
            EventKind::BottleAdded => debug!(bottle, "bottle added"),
            EventKind::BottleStateChanged => {
                debug!(bottle, station, state = ?e.state, "bottle state changed")
            }
            EventKind::BottleCompleted => info!(bottle, "bottle completed"),
            EventKind::BottleFailed => warn!(bottle, station, reason, "bottle failed"),
            EventKind::BottleRetryScheduled => {
                warn!(bottle, delay_ms = ?e.delay_ms, reason, "bottle retry scheduled")
            }
            EventKind::StationAcquired => debug!(bottle, station, "station acquired"),
            EventKind::StationReleased => debug!(bottle, station, "station released"),
            EventKind::StationTimeout => {
                warn!(bottle, station, timeout_ms = ?e.timeout_ms, "station timeout")
            }
            EventKind::AlarmRaised => warn!(
                alarm = e.alarm.as_deref().unwrap_or("-"),
                device = e.device.as_deref().unwrap_or("-"),
                reason,
                "alarm raised"
            ),
            EventKind::AlarmAcknowledged => {
                info!(alarm = e.alarm.as_deref().unwrap_or("-"), "alarm acknowledged")
            }
            EventKind::RoutingFailed => warn!(
                device = e.device.as_deref().unwrap_or("-"),
                reason,
                "routing failed"
            ),
            EventKind::SubscriberOverflow => error!(
                subscriber = e.device.as_deref().unwrap_or("unknown"),
                reason, "subscriber overflow"
            ),
            EventKind::SubscriberPanicked => error!(
                subscriber = e.device.as_deref().unwrap_or("unknown"),
                info = reason,
                "subscriber panicked"
            ),
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
