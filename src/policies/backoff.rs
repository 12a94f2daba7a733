//! # Re-dispatch backoff after engine errors.
//!
//! When a bottle's work unit fails with a retryable
//! [`EngineError`](crate::EngineError), the factory loop does not requeue the
//! bottle immediately. It waits `first × factor^n` (clamped to `max`, then
//! jittered), where `n` counts the consecutive engine errors of that bottle.
//!
//! The base delay depends only on `n`, so jitter never feeds back into the
//! next computation.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use bottleline::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(200),
//!     max: Duration::from_secs(2),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(200));
//! assert_eq!(backoff.next(2), Duration::from_millis(800));
//! assert_eq!(backoff.next(9), Duration::from_secs(2));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry delay policy for bottles that hit an engine-level error.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after the first error.
    pub first: Duration,
    /// Upper bound of the delay.
    pub max: Duration,
    /// Growth factor per consecutive error (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 500ms`, `factor = 2.0`, `max = 5s`, equal jitter.
    ///
    /// `5s` is the retry backoff of the monitoring loops as well.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next dispatch after `errors` consecutive failures (0-indexed).
    pub fn next(&self, errors: u32) -> Duration {
        let exp = errors.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn grows_until_max() {
        let policy = fixed(100, 1_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(3), Duration::from_millis(800));
        assert_eq!(policy.next(4), Duration::from_millis(1_000));
        assert_eq!(policy.next(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn first_above_max_is_clamped() {
        assert_eq!(fixed(10_000, 500, 1.0).next(0), Duration::from_millis(500));
    }

    #[test]
    fn default_equal_jitter_stays_in_upper_half() {
        let policy = BackoffPolicy::default();
        for errors in 0..20 {
            let base = fixed(500, 5_000, 2.0).next(errors);
            let delay = policy.next(errors);
            assert!(delay <= base, "errors={errors} delay={delay:?} base={base:?}");
            assert!(delay >= base / 2, "errors={errors} delay={delay:?} base={base:?}");
        }
    }
}
