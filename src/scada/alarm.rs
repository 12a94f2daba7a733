//! Alarm records and the bounded alarm log.

use std::collections::VecDeque;
use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

use crate::error::ScadaError;

/// Rule that produced an alarm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmKind {
    HighLevel,
    LowLevel,
    HighSpeed,
    StaleData,
    StuckBottle,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::HighLevel => "HIGH_LEVEL",
            AlarmKind::LowLevel => "LOW_LEVEL",
            AlarmKind::HighSpeed => "HIGH_SPEED",
            AlarmKind::StaleData => "STALE_DATA",
            AlarmKind::StuckBottle => "STUCK_BOTTLE",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AlarmKind::LowLevel => Severity::Info,
            AlarmKind::HighLevel | AlarmKind::StaleData => Severity::Warning,
            AlarmKind::HighSpeed | AlarmKind::StuckBottle => Severity::Critical,
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One alarm occurrence. Only `acknowledged` ever changes after creation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alarm {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlarmKind,
    pub message: String,
    pub severity: Severity,
    pub device_id: String,
    pub timestamp: SystemTime,
    pub acknowledged: bool,
}

/// Append-only alarm history; the oldest entries are dropped past `capacity`.
#[derive(Debug)]
pub struct AlarmLog {
    capacity: usize,
    next_id: u64,
    entries: VecDeque<Alarm>,
}

impl AlarmLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: 1,
            entries: VecDeque::new(),
        }
    }

    /// Appends a new alarm and returns a copy of it.
    pub fn raise(
        &mut self,
        kind: AlarmKind,
        device_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Alarm {
        let alarm = Alarm {
            id: format!("ALM-{:06}", self.next_id),
            kind,
            message: message.into(),
            severity: kind.severity(),
            device_id: device_id.into(),
            timestamp: SystemTime::now(),
            acknowledged: false,
        };
        self.next_id += 1;

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(alarm.clone());
        alarm
    }

    /// Marks an alarm acknowledged.
    ///
    /// Returns `Ok(true)` on the first acknowledgement and `Ok(false)` when it
    /// was already acknowledged.
    pub fn acknowledge(&mut self, id: &str) -> Result<bool, ScadaError> {
        let alarm = self
            .entries
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| ScadaError::UnknownAlarm(id.to_string()))?;
        if alarm.acknowledged {
            return Ok(false);
        }
        alarm.acknowledged = true;
        Ok(true)
    }

    /// Unacknowledged alarms, oldest first.
    pub fn active(&self) -> Vec<Alarm> {
        self.entries
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    /// Whole retained history, oldest first.
    pub fn all(&self) -> Vec<Alarm> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unacknowledged(&self) -> usize {
        self.entries.iter().filter(|a| !a.acknowledged).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_is_idempotent() {
        let mut log = AlarmLog::new(10);
        let alarm = log.raise(AlarmKind::HighLevel, "level_filling", "High level");
        assert_eq!(alarm.id, "ALM-000001");
        assert_eq!(alarm.severity, Severity::Warning);

        assert_eq!(log.acknowledge(&alarm.id), Ok(true));
        let after_first = log.all();
        assert_eq!(log.acknowledge(&alarm.id), Ok(false));
        assert_eq!(log.all(), after_first);
        assert!(log.active().is_empty());
    }

    #[test]
    fn trims_oldest_first_and_keeps_ids_unique() {
        let mut log = AlarmLog::new(3);
        for _ in 0..5 {
            log.raise(AlarmKind::LowLevel, "level_filling", "Low level");
        }
        let ids: Vec<String> = log.all().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, ["ALM-000003", "ALM-000004", "ALM-000005"]);
        assert_eq!(
            log.acknowledge("ALM-000001"),
            Err(ScadaError::UnknownAlarm("ALM-000001".into()))
        );
    }
}
