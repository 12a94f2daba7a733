//! # Event subscribers for the bottling line.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and the built-in [`LogWriter`], for handling line events broadcast through
//! the [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   ProcessEngine ─┐
//!   ScadaMonitor  ─┼─ publish(Event) ──► Bus ──► Factory subscriber listener
//!   Factory loop  ─┘                                  │
//!                                                     ▼
//!                                               SubscriberSet::emit
//!                                        ┌────────────┼────────────┐
//!                                        ▼            ▼            ▼
//!                                    LogWriter     Dashboard     Custom ...
//! ```

mod log;
mod subscribe;
mod subscriber_set;

pub use log::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::SubscriberSet;
