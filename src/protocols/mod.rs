//! # Protocol capabilities.
//!
//! The line talks to the outside world through three abstract capabilities:
//!
//! | capability          | stands in for | in-memory implementation |
//! |---------------------|---------------|--------------------------|
//! | [`RegisterStore`]   | Modbus        | [`MemoryRegisters`]      |
//! | [`VariableStore`]   | OPC-UA        | [`MemoryVariables`]      |
//! | [`MessageBroker`]   | MQTT          | [`MemoryBroker`]         |
//!
//! The in-memory implementations optionally record their traffic on a shared
//! [`ProtocolMonitor`].

mod broker;
mod monitor;
pub mod registers;
mod variables;

pub use broker::{MemoryBroker, MessageBroker, TopicHandler, topic_matches, validate_filter};
pub use monitor::{Protocol, ProtocolEvent, ProtocolMonitor, ProtocolSummary};
pub use registers::{MemoryRegisters, RegisterStore};
pub use variables::{MemoryVariables, VariableStore, VariableType};
