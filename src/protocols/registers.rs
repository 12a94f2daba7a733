//! # Register store (Modbus-like).
//!
//! Integer registers addressed by `u16`:
//! ```text
//!   1000..=1999  sensors     zone × 100 + slot
//!   2000..=2999  actuators   zone × 100
//!
//!   zone: filling 0 · capping 1 · labeling 2 · conveyor 3
//!   slot: proximity 0 · level 1 (extra conveyor sensors from 1)
//! ```
//! Values are scaled integers: levels × 10, speeds × 100, booleans 0/1.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use crate::error::ProtocolError;
use crate::protocols::monitor::{Protocol, ProtocolMonitor};

/// First sensor register.
pub const SENSOR_BASE: u16 = 1000;
/// First actuator register.
pub const ACTUATOR_BASE: u16 = 2000;
/// Address distance between two zones.
pub const ZONE_STRIDE: u16 = 100;
/// Last valid register.
pub const REGISTER_MAX: u16 = 2999;

/// Sensor register for `slot` in `zone`.
#[inline]
pub const fn sensor_register(zone: u16, slot: u16) -> u16 {
    SENSOR_BASE + zone * ZONE_STRIDE + slot
}

/// Actuator register of `zone`.
#[inline]
pub const fn actuator_register(zone: u16) -> u16 {
    ACTUATOR_BASE + zone * ZONE_STRIDE
}

/// Abstract register access.
#[async_trait]
pub trait RegisterStore: Send + Sync + 'static {
    /// Writes `value` at `address`.
    async fn update(&self, address: u16, value: i32) -> Result<(), ProtocolError>;

    /// Reads the value at `address`; never-written registers read as `0`.
    async fn read(&self, address: u16) -> Result<i32, ProtocolError>;
}

/// In-memory register bank.
pub struct MemoryRegisters {
    values: RwLock<HashMap<u16, i32>>,
    monitor: Option<Arc<ProtocolMonitor>>,
}

impl MemoryRegisters {
    /// Creates an empty bank.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            monitor: None,
        }
    }

    /// Records every access on `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<ProtocolMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    fn check(address: u16) -> Result<(), ProtocolError> {
        if (SENSOR_BASE..=REGISTER_MAX).contains(&address) {
            Ok(())
        } else {
            Err(ProtocolError::AddressOutOfRange(address))
        }
    }
}

impl Default for MemoryRegisters {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegisterStore for MemoryRegisters {
    async fn update(&self, address: u16, value: i32) -> Result<(), ProtocolError> {
        Self::check(address)?;
        self.values.write().await.insert(address, value);
        if let Some(m) = &self.monitor {
            m.record(
                Protocol::Modbus,
                "line",
                format!("register_{address}"),
                "write",
                json!({ "address": address, "value": value }),
            );
        }
        Ok(())
    }

    async fn read(&self, address: u16) -> Result<i32, ProtocolError> {
        Self::check(address)?;
        let value = self.values.read().await.get(&address).copied().unwrap_or(0);
        if let Some(m) = &self.monitor {
            m.record(
                Protocol::Modbus,
                format!("register_{address}"),
                "line",
                "read",
                json!({ "address": address, "value": value }),
            );
        }
        Ok(value)
    }
}
