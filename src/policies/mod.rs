//! Retry policies.
//!
//! Controls **how long** the factory loop waits before re-dispatching a bottle
//! whose work unit failed with an engine-level error.
//!
//! ## Contents
//! - [`BackoffPolicy`] how the delay evolves (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so failed bottles do not retry in lockstep
//!
//! ## Quick wiring
//! ```text
//! LineConfig { retry: BackoffPolicy, .. }
//!      └─► factory line loop:
//!           - engine.advance(id) → Err(e) if e.is_retryable()
//!           - sleep(retry.next(consecutive_errors)) → requeue id
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
