//! Line events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the factory loop, the process
//! engine, the SCADA monitor, the device handler and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Factory`, `ProcessEngine`, `ScadaMonitor`, `DeviceHandler`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the factory's subscriber listener (fans out to `SubscriberSet`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
