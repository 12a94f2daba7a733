//! # Stations and their locks.
//!
//! Each station has one async lock, held for the whole station phase of one
//! bottle. Waiting for a lock is cancellable; the guard releases on every
//! path (success, error, timeout, task abort).
//!
//! A bottle only ever needs one station at a time, so locks never nest.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::select;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::process::bottle::BottleId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Station {
    Filling,
    Capping,
    Labeling,
}

impl Station {
    pub const ALL: [Station; 3] = [Station::Filling, Station::Capping, Station::Labeling];

    pub fn as_str(&self) -> &'static str {
        match self {
            Station::Filling => "filling",
            Station::Capping => "capping",
            Station::Labeling => "labeling",
        }
    }

    /// Capitalized name, used in bottle error messages.
    pub fn title(&self) -> &'static str {
        match self {
            Station::Filling => "Filling",
            Station::Capping => "Capping",
            Station::Labeling => "Labeling",
        }
    }

    fn index(&self) -> usize {
        match self {
            Station::Filling => 0,
            Station::Capping => 1,
            Station::Labeling => 2,
        }
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three station locks.
#[derive(Default)]
pub struct StationLocks {
    locks: [Mutex<()>; 3],
    /// Occupying bottle id + 1; `0` = free.
    holders: [AtomicU64; 3],
}

/// Proof of exclusive access to one station.
pub struct StationGuard<'a> {
    station: Station,
    bottle: BottleId,
    holder: &'a AtomicU64,
    _guard: MutexGuard<'a, ()>,
}

impl StationGuard<'_> {
    pub fn station(&self) -> Station {
        self.station
    }

    pub fn bottle(&self) -> BottleId {
        self.bottle
    }
}

impl Drop for StationGuard<'_> {
    fn drop(&mut self) {
        self.holder.store(0, Ordering::Release);
    }
}

impl StationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for `station`; `None` if `token` is cancelled first.
    pub async fn acquire(
        &self,
        station: Station,
        bottle: BottleId,
        token: &CancellationToken,
    ) -> Option<StationGuard<'_>> {
        let i = station.index();
        let guard = select! {
            biased;
            _ = token.cancelled() => return None,
            g = self.locks[i].lock() => g,
        };
        self.holders[i].store(bottle.get() + 1, Ordering::Release);
        Some(StationGuard {
            station,
            bottle,
            holder: &self.holders[i],
            _guard: guard,
        })
    }

    pub fn is_busy(&self, station: Station) -> bool {
        self.holders[station.index()].load(Ordering::Acquire) != 0
    }

    /// Bottle currently holding `station`.
    pub fn occupant(&self, station: Station) -> Option<BottleId> {
        match self.holders[station.index()].load(Ordering::Acquire) {
            0 => None,
            n => Some(BottleId::new(n - 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn guard_tracks_occupant_and_releases_on_drop() {
        let locks = StationLocks::new();
        let token = CancellationToken::new();

        let guard = locks
            .acquire(Station::Capping, BottleId::new(0), &token)
            .await
            .unwrap();
        assert!(locks.is_busy(Station::Capping));
        assert_eq!(locks.occupant(Station::Capping), Some(BottleId::new(0)));
        assert!(!locks.is_busy(Station::Filling));

        drop(guard);
        assert!(!locks.is_busy(Station::Capping));
        assert_eq!(locks.occupant(Station::Capping), None);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_is_cancellable() {
        let locks = Arc::new(StationLocks::new());
        let token = CancellationToken::new();
        let _held = locks
            .acquire(Station::Filling, BottleId::new(1), &token)
            .await
            .unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            let token = token.clone();
            tokio::spawn(async move {
                locks
                    .acquire(Station::Filling, BottleId::new(2), &token)
                    .await
                    .is_some()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        assert!(!waiter.await.unwrap());
        assert_eq!(locks.occupant(Station::Filling), Some(BottleId::new(1)));
    }
}
