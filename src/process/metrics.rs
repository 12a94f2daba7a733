//! # Production counters.
//!
//! Lock-free counters (created, successful, failed, station timeouts, peak
//! in-flight units) shared by the engine and the factory. Readers take a
//! serializable [`MetricsSnapshot`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Production counters shared by the engine and the factory.
#[derive(Clone, Default)]
pub struct ProductionMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    bottles_created: AtomicU64,
    successful_bottles: AtomicU64,
    failed_bottles: AtomicU64,
    station_timeouts: AtomicU64,
    in_flight_peak: AtomicU64,
}

impl ProductionMetrics {
    pub fn inc_created(&self) {
        self.inner.bottles_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_successful(&self) {
        self.inner.successful_bottles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.inner.failed_bottles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_station_timeouts(&self) {
        self.inner.station_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_in_flight(&self, active: u64) {
        self.inner.in_flight_peak.fetch_max(active, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bottles_created: self.inner.bottles_created.load(Ordering::Relaxed),
            successful_bottles: self.inner.successful_bottles.load(Ordering::Relaxed),
            failed_bottles: self.inner.failed_bottles.load(Ordering::Relaxed),
            station_timeouts: self.inner.station_timeouts.load(Ordering::Relaxed),
            in_flight_peak: self.inner.in_flight_peak.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub bottles_created: u64,
    pub successful_bottles: u64,
    pub failed_bottles: u64,
    pub station_timeouts: u64,
    pub in_flight_peak: u64,
}
