//! Audit trail and raw artifacts of a run

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::driver::{CycleReading, MeasurementResult};

/// Pipeline stage a log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Baseline DC hold
    Probe,
    /// Forming ladder
    Forming,
    /// Hysteresis profile search
    Hysteresis,
    /// SET/RESET cycling
    Endurance,
    /// Timed retention reads
    Retention,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Probe => "probe",
            Self::Forming => "forming",
            Self::Hysteresis => "hysteresis",
            Self::Endurance => "endurance",
            Self::Retention => "retention",
        };
        f.write_str(name)
    }
}

/// One human-readable line of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    stage: Stage,
    at: DateTime<Utc>,
    message: String,
}

impl LogEntry {
    /// Stage that produced the line.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Wall-clock time of the line.
    #[must_use]
    pub const fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// The message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// Ordered audit trail. Meant for people, not for parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    entries: Vec<LogEntry>,
}

impl AuditLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line (also emitted through `tracing`).
    pub fn push(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        info!(%stage, "{message}");
        self.entries.push(LogEntry {
            stage,
            at: Utc::now(),
            message,
        });
    }

    /// All entries in order.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries of one stage, in order.
    pub fn for_stage(&self, stage: Stage) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.stage == stage)
    }

    /// Rendered `"[stage] message"` lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Raw data kept alongside a [`DeviceOutcome`](super::DeviceOutcome).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunArtifacts {
    /// Trace of the winning hysteresis profile
    pub best_trace: Option<MeasurementResult>,
    /// Trace of the last probe hold
    pub probe_trace: Option<MeasurementResult>,
    /// Endurance cycles actually executed
    pub endurance_cycles: Vec<CycleReading>,
    /// `(time_s, current_a)` retention pairs
    pub retention_reads: Vec<(f64, f64)>,
    /// Narrative of every stage decision
    pub log: AuditLog,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_lines_are_tagged() {
        let mut log = AuditLog::new();
        log.push(Stage::Forming, "step 1.00 V: no spike");
        log.push(Stage::Hysteresis, "profile 1/2");

        assert_eq!(log.len(), 2);
        assert_eq!(
            log.lines(),
            vec![
                "[forming] step 1.00 V: no spike".to_string(),
                "[hysteresis] profile 1/2".to_string()
            ]
        );
        assert_eq!(log.for_stage(Stage::Forming).count(), 1);
    }

    #[test]
    fn test_empty_artifacts() {
        let artifacts = RunArtifacts::default();
        assert!(artifacts.best_trace.is_none());
        assert!(artifacts.log.is_empty());
    }
}
