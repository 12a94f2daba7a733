//! # Line configuration.
//!
//! Provides [`LineConfig`], the centralized settings for one bottling line,
//! split into:
//! - [`SimulationConfig`] — timing of the simulation and the stations;
//! - [`FactoryLayout`] — conveyor geometry and sensor placement;
//! - [`ScadaConfig`] — monitoring interval and alarm thresholds.
//!
//! All times are expressed in **simulated seconds**. Real waits are derived by
//! dividing by [`SimulationConfig::simulation_speed`]; use the helper accessors
//! rather than doing that arithmetic at call sites.
//!
//! ## Sentinel values
//! - `simulation_speed <= 0` → treated as `1.0`
//! - `grace = 0s` → `stop()` does not wait for loops to exit
//! - derived waits are clamped to `[0, MAX_WAIT]` (infinite or overflowing
//!   values included)

use std::time::Duration;

use crate::policies::BackoffPolicy;
use crate::process::Station;

/// Upper bound of any wait derived from simulated time.
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Timing of the simulation and of each station.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Global speed multiplier (`2.0` = twice as fast as real time).
    pub simulation_speed: f64,
    /// Simulated seconds between two new bottles.
    pub bottle_interval: f64,
    /// Nominal filling time.
    pub fill_time: f64,
    /// Nominal capping time.
    pub cap_time: f64,
    /// Nominal labeling time.
    pub label_time: f64,
    /// Simulated length of one tick (fill step, poll interval, conveyor step).
    pub tick_interval: f64,
    /// Fill level at which filling stops and the PLC reports `fill_complete`.
    pub fill_target: f64,
    /// Multiplier applied to a station's nominal time to obtain its timeout.
    pub timeout_factor: f64,
}

impl Default for SimulationConfig {
    /// Returns the reference line: 1 bottle / 2s, fill 3s, cap 1s, label 1.5s, 100ms ticks.
    fn default() -> Self {
        Self {
            simulation_speed: 1.0,
            bottle_interval: 2.0,
            fill_time: 3.0,
            cap_time: 1.0,
            label_time: 1.5,
            tick_interval: 0.1,
            fill_target: 95.0,
            timeout_factor: 1.5,
        }
    }
}

impl SimulationConfig {
    /// Speed multiplier clamped to a usable value.
    #[inline]
    pub fn speed(&self) -> f64 {
        if self.simulation_speed.is_finite() && self.simulation_speed > 0.0 {
            self.simulation_speed
        } else {
            1.0
        }
    }

    /// Converts simulated seconds into a real duration.
    #[inline]
    pub fn scaled(&self, simulated_secs: f64) -> Duration {
        let secs = (simulated_secs / self.speed()).max(0.0);
        Duration::try_from_secs_f64(secs).map_or(MAX_WAIT, |d| d.min(MAX_WAIT))
    }

    /// Real duration of one tick; also the handshake poll interval.
    #[inline]
    pub fn tick(&self) -> Duration {
        self.scaled(self.tick_interval)
    }

    /// Real duration between two injected bottles.
    #[inline]
    pub fn bottle_every(&self) -> Duration {
        self.scaled(self.bottle_interval)
    }

    /// Nominal processing time of a station, in simulated seconds.
    pub fn nominal(&self, station: Station) -> f64 {
        match station {
            Station::Filling => self.fill_time,
            Station::Capping => self.cap_time,
            Station::Labeling => self.label_time,
        }
    }

    /// Real timeout bound of one station phase (`timeout_factor × nominal`).
    pub fn station_timeout(&self, station: Station) -> Duration {
        self.scaled(self.nominal(station) * self.timeout_factor)
    }

    /// Fill level gained per tick: `(100 / fill_time) × tick_interval`.
    pub fn fill_step(&self) -> f64 {
        if self.fill_time <= 0.0 {
            return 100.0;
        }
        (100.0 / self.fill_time) * self.tick_interval
    }
}

/// Physical layout of the conveyor.
#[derive(Clone, Debug)]
pub struct FactoryLayout {
    /// Conveyor length; bottles leave the line at this coordinate.
    pub conveyor_length: f64,
    /// Filling station position.
    pub filling: f64,
    /// Capping station position.
    pub capping: f64,
    /// Labeling station position.
    pub labeling: f64,
    /// Extra proximity sensors along the line, as `(name, position)`.
    /// Each becomes a `proximity_<name>` sensor.
    pub sensor_positions: Vec<(String, f64)>,
    /// A proximity sensor detects a bottle within `± detection_range`.
    pub detection_range: f64,
    /// Maximum speed of the main conveyor motor (units per simulated second).
    pub conveyor_max_speed: f64,
    /// Maximum speed of the labeling motor.
    pub labeling_max_speed: f64,
}

impl Default for FactoryLayout {
    fn default() -> Self {
        let sensors = [
            ("entry", 0.0),
            ("pre_fill", 20.0),
            ("post_fill", 30.0),
            ("pre_cap", 45.0),
            ("post_cap", 55.0),
            ("pre_label", 70.0),
            ("post_label", 80.0),
            ("exit", 100.0),
        ];
        Self {
            conveyor_length: 100.0,
            filling: 25.0,
            capping: 50.0,
            labeling: 75.0,
            sensor_positions: sensors
                .iter()
                .map(|(name, pos)| ((*name).to_string(), *pos))
                .collect(),
            detection_range: 2.0,
            conveyor_max_speed: 1.0,
            labeling_max_speed: 1.0,
        }
    }
}

impl FactoryLayout {
    /// Conveyor coordinate of a station.
    pub fn station_position(&self, station: Station) -> f64 {
        match station {
            Station::Filling => self.filling,
            Station::Capping => self.capping,
            Station::Labeling => self.labeling,
        }
    }
}

/// SCADA monitoring settings.
#[derive(Clone, Debug)]
pub struct ScadaConfig {
    /// Seconds between two monitoring scans (real time, not scaled).
    pub scan_interval: Duration,
    /// Level above which `HIGH_LEVEL` is raised.
    pub level_high: f64,
    /// Level below which `LOW_LEVEL` is raised.
    pub level_low: f64,
    /// Motor speed above which `HIGH_SPEED` is raised.
    pub max_motor_speed: f64,
    /// Age after which a device's last report is `STALE_DATA`.
    pub stale_after: Duration,
    /// A proximity sensor asserted longer than this raises `STUCK_BOTTLE`.
    pub stuck_after: Duration,
    /// Alarm history cap (oldest dropped first).
    pub alarm_capacity: usize,
    /// Device history cap (oldest dropped first).
    pub history_capacity: usize,
}

impl Default for ScadaConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            level_high: 95.0,
            level_low: 5.0,
            max_motor_speed: 1.0,
            stale_after: Duration::from_secs(30),
            stuck_after: Duration::from_secs(10),
            alarm_capacity: 10_000,
            history_capacity: 10_000,
        }
    }
}

/// Global configuration of one line.
///
/// ## Field semantics
/// - `retry`: delay before re-dispatching a bottle whose work unit hit an engine error
/// - `max_retries`: retries per bottle before it is abandoned into `ERROR`
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by `Bus`)
/// - `grace`: maximum wait for loops to exit on `stop()`
/// - `finished_capacity`: how many retired bottles stay queryable
/// - `protocol_log_capacity`: protocol monitor ring buffer size
#[derive(Clone, Debug)]
pub struct LineConfig {
    /// Simulation and station timing.
    pub simulation: SimulationConfig,
    /// Conveyor layout.
    pub layout: FactoryLayout,
    /// SCADA settings.
    pub scada: ScadaConfig,
    /// Re-dispatch backoff after engine-level errors.
    pub retry: BackoffPolicy,
    /// Retries per bottle before it is abandoned.
    pub max_retries: u32,
    /// Event bus capacity.
    pub bus_capacity: usize,
    /// Grace period for `stop()`.
    pub grace: Duration,
    /// Retired bottles kept for inspection.
    pub finished_capacity: usize,
    /// Protocol monitor capacity.
    pub protocol_log_capacity: usize,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            layout: FactoryLayout::default(),
            scada: ScadaConfig::default(),
            retry: BackoffPolicy::default(),
            max_retries: 5,
            bus_capacity: 1024,
            grace: Duration::from_secs(5),
            finished_capacity: 256,
            protocol_log_capacity: 1000,
        }
    }
}

impl LineConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the stop grace period as an `Option` (`None` = do not wait).
    #[inline]
    pub fn grace_period(&self) -> Option<Duration> {
        if self.grace == Duration::ZERO {
            None
        } else {
            Some(self.grace)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extreme_values_clamp_instead_of_panicking() {
        let sim = SimulationConfig {
            bottle_interval: f64::INFINITY,
            ..SimulationConfig::default()
        };
        assert_eq!(sim.bottle_every(), MAX_WAIT);

        let crawl = SimulationConfig {
            simulation_speed: 1e-20,
            ..SimulationConfig::default()
        };
        assert_eq!(crawl.tick(), MAX_WAIT);
        assert_eq!(crawl.station_timeout(Station::Filling), MAX_WAIT);

        let sim = SimulationConfig::default();
        assert_eq!(sim.scaled(f64::NAN), Duration::ZERO);
        assert_eq!(sim.scaled(-3.0), Duration::ZERO);
    }

    #[test]
    fn station_timeout_is_one_and_a_half_nominal() {
        let cfg = SimulationConfig::default();
        assert_eq!(
            cfg.station_timeout(Station::Filling),
            Duration::from_secs_f64(4.5)
        );
        assert_eq!(
            cfg.station_timeout(Station::Capping),
            Duration::from_secs_f64(1.5)
        );
    }

    #[test]
    fn speed_scales_real_waits_but_not_fill_step() {
        let cfg = SimulationConfig {
            simulation_speed: 2.0,
            ..SimulationConfig::default()
        };
        assert_eq!(cfg.tick(), Duration::from_millis(50));
        assert_eq!(cfg.station_timeout(Station::Labeling), Duration::from_secs_f64(1.125));
        assert!((cfg.fill_step() - 100.0 / 3.0 * 0.1).abs() < 1e-9);
    }

    #[test]
    fn invalid_speed_falls_back_to_real_time() {
        let cfg = SimulationConfig {
            simulation_speed: 0.0,
            ..SimulationConfig::default()
        };
        assert_eq!(cfg.tick(), Duration::from_millis(100));
    }
}
