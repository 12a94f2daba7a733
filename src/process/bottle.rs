//! Bottle records and the bottle state graph.
//!
//! ```text
//!  NEW → WAITING_FILL → FILLING → FILLED → WAITING_CAP → CAPPING → CAPPED
//!      → WAITING_LABEL → LABELING → COMPLETED
//!
//!  any non-terminal state ──► ERROR
//! ```

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize, Serializer};

use crate::process::station::Station;

/// Position of a bottle in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BottleState {
    New,
    WaitingFill,
    Filling,
    Filled,
    WaitingCap,
    Capping,
    Capped,
    WaitingLabel,
    Labeling,
    Completed,
    Error,
}

impl BottleState {
    /// Forward path, in order (`Error` excluded).
    pub const PATH: [BottleState; 10] = [
        BottleState::New,
        BottleState::WaitingFill,
        BottleState::Filling,
        BottleState::Filled,
        BottleState::WaitingCap,
        BottleState::Capping,
        BottleState::Capped,
        BottleState::WaitingLabel,
        BottleState::Labeling,
        BottleState::Completed,
    ];

    /// Index on the forward path; `None` for `Error`.
    pub fn ordinal(&self) -> Option<usize> {
        Self::PATH.iter().position(|s| s == self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BottleState::Completed | BottleState::Error)
    }

    /// One step forward along the path, or any non-terminal state to `Error`.
    pub fn can_transition_to(&self, next: BottleState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == BottleState::Error {
            return true;
        }
        match (self.ordinal(), next.ordinal()) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }

    /// Station whose phase this state belongs to.
    pub fn station(&self) -> Option<Station> {
        match self {
            BottleState::WaitingFill | BottleState::Filling => Some(Station::Filling),
            BottleState::WaitingCap | BottleState::Capping => Some(Station::Capping),
            BottleState::WaitingLabel | BottleState::Labeling => Some(Station::Labeling),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BottleState::New => "NEW",
            BottleState::WaitingFill => "WAITING_FILL",
            BottleState::Filling => "FILLING",
            BottleState::Filled => "FILLED",
            BottleState::WaitingCap => "WAITING_CAP",
            BottleState::Capping => "CAPPING",
            BottleState::Capped => "CAPPED",
            BottleState::WaitingLabel => "WAITING_LABEL",
            BottleState::Labeling => "LABELING",
            BottleState::Completed => "COMPLETED",
            BottleState::Error => "ERROR",
        }
    }
}

impl fmt::Display for BottleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bottle identifier, rendered as `bottle_<n>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BottleId(u64);

impl BottleId {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BottleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bottle_{}", self.0)
    }
}

impl Serialize for BottleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One bottle on the line.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bottle {
    pub id: BottleId,
    pub position: f64,
    pub state: BottleState,
    pub fill_level: f64,
    pub has_cap: bool,
    pub has_label: bool,
    pub entry_time: SystemTime,
    /// Set only in `ERROR`.
    pub error: Option<String>,
}

impl Bottle {
    /// A new bottle at the line entry.
    pub fn new(id: BottleId) -> Self {
        Self {
            id,
            position: 0.0,
            state: BottleState::New,
            fill_level: 0.0,
            has_cap: false,
            has_label: false,
            entry_time: SystemTime::now(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_path() {
        assert!(BottleState::New.can_transition_to(BottleState::WaitingFill));
        assert!(!BottleState::WaitingFill.can_transition_to(BottleState::Filled));
        assert!(!BottleState::WaitingFill.can_transition_to(BottleState::Capping));
        assert!(BottleState::Labeling.can_transition_to(BottleState::Completed));
        assert!(!BottleState::Filled.can_transition_to(BottleState::Filling));
    }

    #[test]
    fn error_is_reachable_only_from_non_terminal_states() {
        for state in BottleState::PATH {
            assert_eq!(
                state.can_transition_to(BottleState::Error),
                state != BottleState::Completed,
                "{state}"
            );
        }
        assert!(!BottleState::Error.can_transition_to(BottleState::Error));
    }

    #[test]
    fn ids_and_states_serialize_like_their_names() {
        let bottle = Bottle::new(BottleId::new(7));
        let json = serde_json::to_value(&bottle).unwrap();
        assert_eq!(json["id"], "bottle_7");
        assert_eq!(json["state"], "NEW");
        assert_eq!(BottleState::WaitingLabel.to_string(), "WAITING_LABEL");
    }
}
