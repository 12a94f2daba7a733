//! # Line context.
//!
//! [`LineContext`] carries the shared handles every component needs: the
//! three protocol capabilities, the protocol traffic monitor and the event
//! bus. It is built once and passed down explicitly.
//!
//! ```rust
//! use bottleline::{LineConfig, LineContext};
//!
//! let ctx = LineContext::in_memory(&LineConfig::default());
//! assert_eq!(ctx.monitor.summary().modbus_events, 0);
//! ```

use std::sync::Arc;

use crate::config::LineConfig;
use crate::events::Bus;
use crate::protocols::{
    MemoryBroker, MemoryRegisters, MemoryVariables, MessageBroker, ProtocolMonitor, RegisterStore,
    VariableStore,
};

/// Shared handles of one line.
#[derive(Clone)]
pub struct LineContext {
    pub registers: Arc<dyn RegisterStore>,
    pub variables: Arc<dyn VariableStore>,
    pub broker: Arc<dyn MessageBroker>,
    pub monitor: Arc<ProtocolMonitor>,
    pub bus: Bus,
}

impl LineContext {
    /// Context over caller-provided capabilities.
    pub fn new(
        registers: Arc<dyn RegisterStore>,
        variables: Arc<dyn VariableStore>,
        broker: Arc<dyn MessageBroker>,
        monitor: Arc<ProtocolMonitor>,
        bus: Bus,
    ) -> Self {
        Self {
            registers,
            variables,
            broker,
            monitor,
            bus,
        }
    }

    /// Context backed by the in-memory protocol stores, all reporting to one monitor.
    pub fn in_memory(cfg: &LineConfig) -> Self {
        let monitor = Arc::new(ProtocolMonitor::new(cfg.protocol_log_capacity));
        Self {
            registers: Arc::new(MemoryRegisters::new().with_monitor(Arc::clone(&monitor))),
            variables: Arc::new(MemoryVariables::new().with_monitor(Arc::clone(&monitor))),
            broker: Arc::new(MemoryBroker::new().with_monitor(Arc::clone(&monitor))),
            monitor,
            bus: Bus::new(cfg.bus_capacity_clamped()),
        }
    }
}
