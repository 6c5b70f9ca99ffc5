//! Device Outcome - final per-device record of a pipeline run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::thresholds::Profile;

/// Result of an optional late stage.
///
/// Separates "ran and produced a value" from "did not run" and from
/// "started but was cut short", which a bare `Option` cannot express.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageResult<T> {
    /// Stage ran to completion.
    Completed(T),
    /// Stage started but did not finish (e.g. operator abort).
    Partial {
        /// Why the stage stopped
        reason: String,
    },
    /// Stage was never entered.
    Skipped {
        /// Why the stage did not run
        reason: String,
    },
}

impl<T> StageResult<T> {
    /// Create a `Partial` result.
    #[must_use]
    pub fn partial(reason: impl Into<String>) -> Self {
        Self::Partial {
            reason: reason.into(),
        }
    }

    /// Create a `Skipped` result.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// The value, if the stage completed.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Partial { .. } | Self::Skipped { .. } => None,
        }
    }

    /// Whether the stage completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Whether the stage started but was cut short.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    /// Reason for a partial or skipped stage.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Partial { reason } | Self::Skipped { reason } => Some(reason),
        }
    }
}

/// Endurance stage summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnduranceSummary {
    /// Median on/off ratio over the cycles actually executed
    pub median_ratio: f64,
    /// Cycles executed
    pub cycles_run: usize,
    /// True if the consecutive-failure rule ended the run
    pub stopped_early: bool,
}

/// Retention stage summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionSummary {
    /// Fitted power-law decay exponent (0.0 for a degenerate fit)
    pub alpha: f64,
    /// Requested read times (seconds)
    pub times_s: Vec<f64>,
    /// Read currents, same order as `times_s` (amps)
    pub currents_a: Vec<f64>,
}

/// Final record for one device under test.
///
/// Built exactly once at the end of [`run_device`](super::TestRunner::run_device);
/// the caller owns it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    device_id: String,
    is_working: bool,
    formed: bool,
    probe_current_a: f64,
    hysteresis_area: Option<f64>,
    best_profile: Option<Profile>,
    notes: String,
    endurance: StageResult<EnduranceSummary>,
    retention: StageResult<RetentionSummary>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl DeviceOutcome {
    /// Create a builder; the start timestamp is taken now.
    #[must_use]
    pub fn builder(device_id: impl Into<String>) -> DeviceOutcomeBuilder {
        DeviceOutcomeBuilder::new(device_id)
    }

    /// Device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Whether the final probe classified the device as working.
    #[must_use]
    pub const fn is_working(&self) -> bool {
        self.is_working
    }

    /// Whether the forming ladder succeeded.
    #[must_use]
    pub const fn formed(&self) -> bool {
        self.formed
    }

    /// Mean current of the last probe (amps).
    #[must_use]
    pub const fn probe_current_a(&self) -> f64 {
        self.probe_current_a
    }

    /// Loop area of the best hysteresis profile.
    #[must_use]
    pub const fn hysteresis_area(&self) -> Option<f64> {
        self.hysteresis_area
    }

    /// Winning hysteresis profile.
    #[must_use]
    pub const fn best_profile(&self) -> Option<&Profile> {
        self.best_profile.as_ref()
    }

    /// Free-text notes.
    #[must_use]
    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Endurance stage result.
    #[must_use]
    pub const fn endurance(&self) -> &StageResult<EnduranceSummary> {
        &self.endurance
    }

    /// Retention stage result.
    #[must_use]
    pub const fn retention(&self) -> &StageResult<RetentionSummary> {
        &self.retention
    }

    /// Median endurance on/off ratio, if endurance completed.
    #[must_use]
    pub fn endurance_ratio(&self) -> Option<f64> {
        self.endurance.value().map(|s| s.median_ratio)
    }

    /// Retention decay exponent, if retention completed.
    #[must_use]
    pub fn retention_alpha(&self) -> Option<f64> {
        self.retention.value().map(|s| s.alpha)
    }

    /// When the run started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the outcome was built.
    #[must_use]
    pub const fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}

/// Builder for `DeviceOutcome`.
#[derive(Debug)]
pub struct DeviceOutcomeBuilder {
    device_id: String,
    is_working: bool,
    formed: bool,
    probe_current_a: f64,
    best: Option<(Profile, f64)>,
    notes: Vec<String>,
    endurance: StageResult<EnduranceSummary>,
    retention: StageResult<RetentionSummary>,
    started_at: DateTime<Utc>,
}

impl DeviceOutcomeBuilder {
    /// Create a builder with only the device id set.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            is_working: false,
            formed: false,
            probe_current_a: 0.0,
            best: None,
            notes: Vec::new(),
            endurance: StageResult::skipped("not reached"),
            retention: StageResult::skipped("not reached"),
            started_at: Utc::now(),
        }
    }

    /// Record a probe result.
    #[must_use]
    pub const fn probe(mut self, is_working: bool, probe_current_a: f64) -> Self {
        self.is_working = is_working;
        self.probe_current_a = probe_current_a;
        self
    }

    /// Mark the device as formed.
    #[must_use]
    pub const fn formed(mut self, formed: bool) -> Self {
        self.formed = formed;
        self
    }

    /// Record the hysteresis search winner.
    #[must_use]
    pub const fn best_profile(mut self, profile: Profile, area: f64) -> Self {
        self.best = Some((profile, area));
        self
    }

    /// Append a note.
    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Record the endurance result.
    #[must_use]
    pub fn endurance(mut self, endurance: StageResult<EnduranceSummary>) -> Self {
        self.endurance = endurance;
        self
    }

    /// Record the retention result.
    #[must_use]
    pub fn retention(mut self, retention: StageResult<RetentionSummary>) -> Self {
        self.retention = retention;
        self
    }

    /// Set a custom start timestamp.
    #[must_use]
    pub const fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Build the `DeviceOutcome`, stamping the finish time.
    #[must_use]
    pub fn build(self) -> DeviceOutcome {
        DeviceOutcome {
            device_id: self.device_id,
            is_working: self.is_working,
            formed: self.formed,
            probe_current_a: self.probe_current_a,
            hysteresis_area: self.best.map(|(_, area)| area),
            best_profile: self.best.map(|(profile, _)| profile),
            notes: self.notes.join("; "),
            endurance: self.endurance,
            retention: self.retention,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
