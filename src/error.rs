//! Error types used by the bottling line.
//!
//! Every enum here follows the same shape: a `thiserror` display message for
//! humans plus an `as_label` method returning a short, stable snake_case label
//! for logs and metrics.
//!
//! - [`StationError`] — a station phase failed (timeout, cancellation, device fault).
//!   Recorded on the bottle, never fatal to the engine.
//! - [`EngineError`] — the process engine itself hit an inconsistency.
//! - [`RoutingError`] — a sensor/actuator id or register maps to no PLC.
//! - [`DeviceError`] — a device registry operation was rejected.
//! - [`ProtocolError`] — a register/variable/broker call failed.
//! - [`ScadaError`] — alarm API misuse.
//! - [`InitError`] — startup could not complete (fatal, propagated).
//! - [`FactoryError`] — lifecycle errors of the whole line.

use std::time::Duration;

use thiserror::Error;

use crate::devices::Operation;
use crate::process::{BottleId, BottleState, Station};

/// # Failure of one station phase.
///
/// Produced inside the filling/capping/labeling work units and caught at the
/// phase boundary, where it is converted into a bottle in `ERROR` state.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StationError {
    /// The phase did not finish within `1.5 × nominal` station time.
    #[error("{station} timeout after {timeout:?} (plc operation: {observed})")]
    Timeout {
        /// Station whose phase timed out.
        station: Station,
        /// The bound that was exceeded.
        timeout: Duration,
        /// Last operation token the PLC was showing.
        observed: Operation,
    },

    /// The line was stopped while the phase was in progress.
    #[error("{station} interrupted by shutdown")]
    Canceled {
        /// Station whose phase was interrupted.
        station: Station,
    },

    /// A device or controller needed by the phase is missing or refused a command.
    #[error("{station} device failure: {reason}")]
    Device {
        /// Station whose phase failed.
        station: Station,
        /// Underlying failure.
        reason: String,
    },
}

impl StationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use bottleline::{Operation, Station, StationError};
    ///
    /// let err = StationError::Timeout {
    ///     station: Station::Capping,
    ///     timeout: Duration::from_millis(1500),
    ///     observed: Operation::None,
    /// };
    /// assert_eq!(err.as_label(), "station_timeout");
    /// assert!(err.to_string().contains("timeout"));
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StationError::Timeout { .. } => "station_timeout",
            StationError::Canceled { .. } => "station_canceled",
            StationError::Device { .. } => "station_device",
        }
    }

    /// Station the error belongs to.
    pub fn station(&self) -> Station {
        match self {
            StationError::Timeout { station, .. }
            | StationError::Canceled { station }
            | StationError::Device { station, .. } => *station,
        }
    }

    /// Message recorded on the failed bottle, e.g. `"Capping error: capping timeout after ..."`.
    pub fn bottle_message(&self) -> String {
        format!("{} error: {self}", self.station().title())
    }
}

/// # Errors raised by the process engine itself.
///
/// These are engine-level problems, not station failures: the factory loop
/// logs them and retries the bottle after a backoff delay when
/// [`EngineError::is_retryable`] says so.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// No bottle with this id is active.
    #[error("unknown bottle {0}")]
    UnknownBottle(BottleId),

    /// A bottle with this id was already admitted.
    #[error("bottle {0} already admitted")]
    DuplicateBottle(BottleId),

    /// A state change outside the transition graph was attempted.
    #[error("bottle {id}: illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Bottle id.
        id: BottleId,
        /// Current state.
        from: BottleState,
        /// Rejected target state.
        to: BottleState,
    },
}

impl EngineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::UnknownBottle(_) => "engine_unknown_bottle",
            EngineError::DuplicateBottle(_) => "engine_duplicate_bottle",
            EngineError::InvalidTransition { .. } => "engine_invalid_transition",
        }
    }

    /// Whether retrying the same bottle later can succeed.
    ///
    /// An unknown bottle never reappears and an illegal transition repeats on
    /// every attempt; only a duplicate admission may clear up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::DuplicateBottle(_))
    }
}

/// # Routing failures inside the device handler.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// Device id does not name any of `filling|capping|labeling|conveyor`.
    #[error("device `{device_id}` is not mapped to any station")]
    Unmapped {
        /// Offending device id.
        device_id: String,
    },

    /// Register address does not belong to a known sensor.
    #[error("register {address} is not mapped to any sensor")]
    UnknownRegister {
        /// Offending address.
        address: u16,
    },
}

impl RoutingError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RoutingError::Unmapped { .. } => "routing_unmapped",
            RoutingError::UnknownRegister { .. } => "routing_unknown_register",
        }
    }
}

/// # Device registry errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No sensor or actuator with this id.
    #[error("unknown device `{0}`")]
    UnknownDevice(String),

    /// The device kind does not support this operation (e.g. speed on a valve).
    #[error("device `{device}` does not support {operation}")]
    Unsupported {
        /// Device id.
        device: String,
        /// Operation name.
        operation: &'static str,
    },
}

impl DeviceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DeviceError::UnknownDevice(_) => "device_unknown",
            DeviceError::Unsupported { .. } => "device_unsupported",
        }
    }
}

/// # Protocol capability errors (registers, variables, broker).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Register address outside 1000–2999.
    #[error("register address {0} out of range")]
    AddressOutOfRange(u16),

    /// Variable was never created.
    #[error("variable `{0}` not found")]
    VariableNotFound(String),

    /// Variable already exists.
    #[error("variable `{0}` already exists")]
    VariableExists(String),

    /// Value does not match the declared variable type.
    #[error("variable `{name}` expects {expected}, got {found}")]
    TypeMismatch {
        /// Variable name.
        name: String,
        /// Declared type.
        expected: &'static str,
        /// Type of the rejected value.
        found: &'static str,
    },

    /// Topic or topic filter is malformed.
    #[error("invalid topic `{0}`")]
    InvalidTopic(String),
}

impl ProtocolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProtocolError::AddressOutOfRange(_) => "protocol_address_out_of_range",
            ProtocolError::VariableNotFound(_) => "protocol_variable_not_found",
            ProtocolError::VariableExists(_) => "protocol_variable_exists",
            ProtocolError::TypeMismatch { .. } => "protocol_type_mismatch",
            ProtocolError::InvalidTopic(_) => "protocol_invalid_topic",
        }
    }
}

/// # SCADA API errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScadaError {
    /// Alarm id was never issued (or was trimmed from history).
    #[error("unknown alarm `{0}`")]
    UnknownAlarm(String),
}

/// # Fatal startup errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    /// A component required at startup is absent.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// Creating a process variable failed.
    #[error("failed to create variable `{name}`: {source}")]
    Variable {
        /// Variable name.
        name: String,
        /// Underlying protocol error.
        #[source]
        source: ProtocolError,
    },

    /// Subscribing to a broker topic failed.
    #[error("failed to subscribe to `{pattern}`: {source}")]
    Subscription {
        /// Topic filter.
        pattern: String,
        /// Underlying protocol error.
        #[source]
        source: ProtocolError,
    },
}

impl InitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            InitError::MissingDependency(_) => "init_missing_dependency",
            InitError::Variable { .. } => "init_variable",
            InitError::Subscription { .. } => "init_subscription",
        }
    }
}

/// # Line lifecycle errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FactoryError {
    /// Startup failed.
    #[error(transparent)]
    Init(#[from] InitError),

    /// `start` was called on a running line.
    #[error("factory is already running")]
    AlreadyRunning,

    /// Stop grace period was exceeded; some loops did not exit in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// Configured grace period.
        grace: Duration,
        /// Names of loops still running.
        stuck: Vec<String>,
    },
}

impl FactoryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            FactoryError::Init(e) => e.as_label(),
            FactoryError::AlreadyRunning => "factory_already_running",
            FactoryError::GraceExceeded { .. } => "factory_grace_exceeded",
        }
    }
}
