//! # Bottle flow: state graph, station locks, the process engine and counters.
//!
//! - [`Bottle`], [`BottleId`], [`BottleState`]: one bottle and its lifecycle graph
//! - [`Station`], [`StationLocks`]: the three stations and their mutual exclusion
//! - [`ProcessEngine`]: advances bottles one unit of work at a time
//! - [`ProductionMetrics`]: created / successful / failed counters

mod bottle;
mod engine;
mod metrics;
mod station;

pub use bottle::{Bottle, BottleId, BottleState};
pub use engine::{ProcessEngine, ProcessStatus};
pub use metrics::{MetricsSnapshot, ProductionMetrics};
pub use station::{Station, StationGuard, StationLocks};
