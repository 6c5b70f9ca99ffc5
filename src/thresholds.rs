//! Pipeline thresholds and their JSON settings file
//!
//! [`Thresholds`] is created once per run, either from defaults or from
//! `tests_settings.json`, and is never mutated afterwards. The runner shares
//! it behind an `Arc`.
//!
//! ## File format
//!
//! A flat JSON object keyed by field name. List-valued fields are JSON
//! arrays, and each hysteresis profile is a 4-element array
//! `[v_max, step_v, dwell_s, compliance_a]`:
//!
//! ```json
//! {
//!   "probe_voltage_v": 0.2,
//!   "forming_voltages_v": [1.0, 1.5, 2.0],
//!   "hyst_profiles": [[0.5, 0.05, 0.01, 0.0001]]
//! }
//! ```
//!
//! Loading never fails. Unknown keys are ignored, missing keys take their
//! defaults, and a missing, unreadable or mistyped file yields
//! [`Thresholds::default`]. A file that parses is returned as written, so
//! `load_thresholds(save_thresholds(t))` gives back `t`. Values that
//! [`Thresholds::validate`] rejects are only logged; the driver refuses them
//! with [`Error::InvalidInput`] when a stage tries to use them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::SafetyLimits;
use crate::{Error, Result};

/// Conventional settings file name
pub const SETTINGS_FILE_NAME: &str = "tests_settings.json";

/// One candidate hysteresis sweep: `(v_max, step_v, dwell_s, compliance_a)`.
///
/// Serialized as a 4-element JSON array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64, f64, f64)", into = "(f64, f64, f64, f64)")]
pub struct Profile {
    v_max: f64,
    step_v: f64,
    dwell_s: f64,
    compliance_a: f64,
}

impl Profile {
    /// Create a profile.
    #[must_use]
    pub const fn new(v_max: f64, step_v: f64, dwell_s: f64, compliance_a: f64) -> Self {
        Self {
            v_max,
            step_v,
            dwell_s,
            compliance_a,
        }
    }

    /// Sweep amplitude (the sweep runs `-v_max..=v_max`).
    #[must_use]
    pub const fn v_max(&self) -> f64 {
        self.v_max
    }

    /// Voltage increment.
    #[must_use]
    pub const fn step_v(&self) -> f64 {
        self.step_v
    }

    /// Dwell per point (seconds).
    #[must_use]
    pub const fn dwell_s(&self) -> f64 {
        self.dwell_s
    }

    /// Compliance declared for this profile (amps).
    #[must_use]
    pub const fn compliance_a(&self) -> f64 {
        self.compliance_a
    }
}

impl From<(f64, f64, f64, f64)> for Profile {
    fn from((v_max, step_v, dwell_s, compliance_a): (f64, f64, f64, f64)) -> Self {
        Self::new(v_max, step_v, dwell_s, compliance_a)
    }
}

impl From<Profile> for (f64, f64, f64, f64) {
    fn from(p: Profile) -> Self {
        (p.v_max, p.step_v, p.dwell_s, p.compliance_a)
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "±{} V step {} V dwell {} s Icc {:e} A",
            self.v_max, self.step_v, self.dwell_s, self.compliance_a
        )
    }
}

/// Every tunable of the pipeline, grouped by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    // ── Probe ───────────────────────────────────────────────────────
    /// Probe hold voltage (volts)
    pub probe_voltage_v: f64,
    /// Probe hold duration (seconds)
    pub probe_duration_s: f64,
    /// Probe sample rate (Hz)
    pub probe_sample_hz: f64,
    /// Probe compliance (amps)
    pub probe_compliance_a: f64,
    /// Mean probe current above which the device counts as working (amps)
    pub working_current_a: f64,

    // ── Forming ─────────────────────────────────────────────────────
    /// Forming ladder amplitudes, visited in ascending order (volts)
    pub forming_voltages_v: Vec<f64>,
    /// Forming sweep step (volts)
    pub forming_step_v: f64,
    /// Forming sweep dwell per point (seconds)
    pub forming_dwell_s: f64,
    /// Forming compliance (amps)
    pub forming_compliance_a: f64,
    /// Any |current| at or above this means the device formed (amps)
    pub forming_spike_current_a: f64,
    /// Loop area at or above this means the device formed (V·A)
    pub forming_hysteresis_min: f64,
    /// Rest between unsuccessful forming steps (seconds)
    pub forming_cooldown_s: f64,

    // ── Hysteresis search ───────────────────────────────────────────
    /// Candidate profiles, evaluated in order
    pub hyst_profiles: Vec<Profile>,
    /// How many leading profiles to evaluate
    pub hyst_budget: usize,

    // ── Endurance ───────────────────────────────────────────────────
    /// Requested cycle count (the runner caps it)
    pub endurance_cycles: usize,
    /// SET pulse amplitude (volts)
    pub endurance_set_v: f64,
    /// RESET pulse amplitude (volts)
    pub endurance_reset_v: f64,
    /// Pulse width (seconds)
    pub endurance_pulse_s: f64,
    /// Read voltage (volts)
    pub endurance_read_v: f64,
    /// A cycle fails when its on/off ratio is below this
    pub endurance_abort_on_ratio_below: f64,
    /// Stop after this many consecutive failing cycles (0 never stops)
    pub endurance_abort_consec: usize,

    // ── Retention ───────────────────────────────────────────────────
    /// Elapsed times at which to read (seconds)
    pub retention_times_s: Vec<f64>,
    /// Read voltage (volts)
    pub retention_read_v: f64,

    // ── Safety caps ─────────────────────────────────────────────────
    /// Largest |voltage| any stage may apply (volts)
    pub max_voltage_v: f64,
    /// Largest compliance any stage may request (amps)
    pub max_compliance_a: f64,
    /// Largest current slew between consecutive samples (A/s)
    pub max_current_slew_a_per_s: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            probe_voltage_v: 0.1,
            probe_duration_s: 1.0,
            probe_sample_hz: 10.0,
            probe_compliance_a: 1e-4,
            working_current_a: 1e-7,

            forming_voltages_v: vec![1.0, 1.5, 2.0, 2.5, 3.0, 3.5],
            forming_step_v: 0.05,
            forming_dwell_s: 0.01,
            forming_compliance_a: 1e-4,
            forming_spike_current_a: 5e-5,
            forming_hysteresis_min: 1e-7,
            forming_cooldown_s: 1.0,

            hyst_profiles: vec![
                Profile::new(0.5, 0.05, 0.01, 1e-4),
                Profile::new(1.0, 0.05, 0.01, 1e-4),
                Profile::new(1.5, 0.05, 0.01, 1e-4),
                Profile::new(2.0, 0.1, 0.01, 1e-3),
            ],
            hyst_budget: 4,

            endurance_cycles: 100,
            endurance_set_v: 1.5,
            endurance_reset_v: -1.5,
            endurance_pulse_s: 0.01,
            endurance_read_v: 0.1,
            endurance_abort_on_ratio_below: 2.0,
            endurance_abort_consec: 5,

            retention_times_s: vec![1.0, 3.0, 10.0, 30.0, 100.0],
            retention_read_v: 0.1,

            max_voltage_v: 5.0,
            max_compliance_a: 1e-2,
            max_current_slew_a_per_s: 1.0,
        }
    }
}

impl Thresholds {
    /// Safety caps for the measurement driver.
    #[must_use]
    pub const fn safety_limits(&self) -> SafetyLimits {
        SafetyLimits {
            max_voltage_v: self.max_voltage_v,
            max_compliance_a: self.max_compliance_a,
            max_current_slew_a_per_s: self.max_current_slew_a_per_s,
        }
    }

    /// The profiles the hysteresis search will consider, in order.
    #[must_use]
    pub fn search_profiles(&self) -> &[Profile] {
        let n = self.hyst_budget.min(self.hyst_profiles.len());
        &self.hyst_profiles[..n]
    }

    /// Forming ladder in ascending order.
    #[must_use]
    pub fn forming_ladder(&self) -> Vec<f64> {
        let mut ladder = self.forming_voltages_v.clone();
        ladder.sort_by(f64::total_cmp);
        ladder
    }

    /// Check that every value is usable by the driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("probe_voltage_v", self.probe_voltage_v),
            ("working_current_a", self.working_current_a),
            ("endurance_set_v", self.endurance_set_v),
            ("endurance_reset_v", self.endurance_reset_v),
            ("endurance_read_v", self.endurance_read_v),
            ("endurance_abort_on_ratio_below", self.endurance_abort_on_ratio_below),
            ("retention_read_v", self.retention_read_v),
        ];
        let non_negative = [
            ("probe_duration_s", self.probe_duration_s),
            ("forming_dwell_s", self.forming_dwell_s),
            ("forming_hysteresis_min", self.forming_hysteresis_min),
            ("forming_cooldown_s", self.forming_cooldown_s),
            ("endurance_pulse_s", self.endurance_pulse_s),
        ];
        let positive = [
            ("probe_sample_hz", self.probe_sample_hz),
            ("probe_compliance_a", self.probe_compliance_a),
            ("forming_step_v", self.forming_step_v),
            ("forming_compliance_a", self.forming_compliance_a),
            ("forming_spike_current_a", self.forming_spike_current_a),
            ("max_voltage_v", self.max_voltage_v),
            ("max_compliance_a", self.max_compliance_a),
            ("max_current_slew_a_per_s", self.max_current_slew_a_per_s),
        ];

        for (name, value) in finite {
            check(name, value, value.is_finite())?;
        }
        for (name, value) in non_negative {
            check(name, value, value.is_finite() && value >= 0.0)?;
        }
        for (name, value) in positive {
            check(name, value, value.is_finite() && value > 0.0)?;
        }
        for &v in &self.forming_voltages_v {
            check("forming_voltages_v", v, v.is_finite())?;
        }
        for &t in &self.retention_times_s {
            check("retention_times_s", t, t.is_finite() && t >= 0.0)?;
        }
        for p in &self.hyst_profiles {
            check("hyst_profiles.v_max", p.v_max, p.v_max.is_finite() && p.v_max > 0.0)?;
            check("hyst_profiles.step_v", p.step_v, p.step_v.is_finite() && p.step_v > 0.0)?;
            check("hyst_profiles.dwell_s", p.dwell_s, p.dwell_s.is_finite() && p.dwell_s >= 0.0)?;
            check(
                "hyst_profiles.compliance_a",
                p.compliance_a,
                p.compliance_a.is_finite() && p.compliance_a > 0.0,
            )?;
        }
        Ok(())
    }
}

fn check(name: &str, value: f64, ok: bool) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("threshold {name} has unusable value {value}")))
    }
}

/// Load thresholds from a JSON settings file.
///
/// Never fails: any problem is logged and the defaults are returned.
#[must_use]
pub fn load_thresholds<P: AsRef<Path>>(path: P) -> Thresholds {
    let path = path.as_ref();

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Thresholds::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable settings file, using defaults");
            return Thresholds::default();
        }
    };

    let thresholds = match serde_json::from_str::<Thresholds>(&contents) {
        Ok(thresholds) => thresholds,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse settings, using defaults");
            return Thresholds::default();
        }
    };

    // Keep what the operator wrote; bad values surface when a stage uses them
    if let Err(e) = thresholds.validate() {
        warn!(path = %path.display(), error = %e, "settings contain unusable values");
    }

    thresholds
}

/// Write thresholds as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`Error::Serialization`] or [`Error::Io`] if the file cannot be
/// encoded or written.
pub fn save_thresholds<P: AsRef<Path>>(thresholds: &Thresholds, path: P) -> Result<()> {
    let mut json = serde_json::to_string_pretty(thresholds)?;
    json.push('\n');
    std::fs::write(path.as_ref(), json)?;
    Ok(())
}
