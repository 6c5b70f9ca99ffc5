//! Adaptive test runner
//!
//! Sequences the driver through the characterization stages for one device
//! and decides each next step from the previous stage's score:
//!
//! ```text
//! Probe ──working──────────────────────────┐
//!   │                                      ▼
//!   └─not working─► Forming ─success─► Probe ─► Hysteresis search
//!                      │                           │
//!                  exhausted                  best profile?
//!                      ▼                           ▼
//!                   (done)             Endurance ─► Retention
//! ```
//!
//! ## Failure policy
//!
//! - Any error in probe, forming or the hysteresis search (including an
//!   operator abort) ends the run and no outcome is produced.
//! - An abort during endurance or retention is absorbed: the outcome is
//!   still produced and the stage is recorded as [`StageResult::Partial`].
//!   Every other error still propagates.

mod audit;
mod outcome;

pub use audit::{AuditLog, LogEntry, RunArtifacts, Stage};
pub use outcome::{
    DeviceOutcome, DeviceOutcomeBuilder, EnduranceSummary, RetentionSummary, StageResult,
};

use std::sync::Arc;

use tracing::info_span;

use crate::driver::{
    Clock, FailureStop, Instrument, MeasurementDriver, MeasurementResult, PulseSpec, SweepSpec,
    SystemClock,
};
use crate::metrics;
use crate::thresholds::{Profile, Thresholds};
use crate::Result;

/// Upper bound on endurance cycles run per device
pub const ENDURANCE_CYCLE_CAP: usize = 20;

/// Drives one device at a time through the full pipeline.
///
/// The runner owns the driver (and through it the instrument), so a second
/// concurrent `run_device` on the same hardware cannot be expressed.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use memristor_pipeline::driver::MeasurementDriver;
/// use memristor_pipeline::runner::TestRunner;
/// use memristor_pipeline::sim::SimulatedMemristor;
/// use memristor_pipeline::thresholds::load_thresholds;
///
/// let thresholds = Arc::new(load_thresholds("tests_settings.json"));
/// let driver = MeasurementDriver::new(SimulatedMemristor::default());
/// let mut runner = TestRunner::new(driver, thresholds);
///
/// let (outcome, artifacts) = runner.run_device("wafer3-D12")?;
/// for line in artifacts.log.lines() {
///     println!("{line}");
/// }
/// println!("working: {}", outcome.is_working());
/// # Ok::<(), memristor_pipeline::Error>(())
/// ```
pub struct TestRunner<I, C = SystemClock> {
    driver: MeasurementDriver<I, C>,
    thresholds: Arc<Thresholds>,
}

impl<I: Instrument, C: Clock> TestRunner<I, C> {
    /// Create a runner. The driver's safety caps are replaced by the ones
    /// in `thresholds`.
    #[must_use]
    pub fn new(mut driver: MeasurementDriver<I, C>, thresholds: Arc<Thresholds>) -> Self {
        driver.set_limits(thresholds.safety_limits());
        Self { driver, thresholds }
    }

    /// Thresholds in use.
    #[must_use]
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Borrow the driver.
    #[must_use]
    pub const fn driver(&self) -> &MeasurementDriver<I, C> {
        &self.driver
    }

    /// Run the full pipeline on one device.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by probe, forming or the hysteresis
    /// search, and any non-abort error from endurance or retention. In those
    /// cases no outcome is produced.
    pub fn run_device(&mut self, device_id: &str) -> Result<(DeviceOutcome, RunArtifacts)> {
        let span = info_span!("run_device", device_id);
        let _entered = span.enter();

        let t = Arc::clone(&self.thresholds);
        let mut artifacts = RunArtifacts::default();
        let mut outcome = DeviceOutcome::builder(device_id);

        let (mut working, mut probe_current) = self.probe(&t, &mut artifacts)?;

        if !working {
            if let Some(voltage) = self.form(&t, &mut artifacts.log)? {
                outcome = outcome.formed(true).note(format!("formed at {voltage} V"));
                (working, probe_current) = self.probe(&t, &mut artifacts)?;
                if !working {
                    outcome = outcome.note("formed but still below working current");
                }
            } else {
                outcome = outcome.note("forming ladder exhausted without switching");
            }
        }
        outcome = outcome.probe(working, probe_current);

        if !working {
            let reason = "device not working";
            return Ok((
                outcome
                    .endurance(StageResult::skipped(reason))
                    .retention(StageResult::skipped(reason))
                    .build(),
                artifacts,
            ));
        }

        let Some((profile, area)) = self.search(&t, &mut artifacts)? else {
            let reason = "no hysteresis profile produced a loop";
            return Ok((
                outcome
                    .note(reason)
                    .endurance(StageResult::skipped(reason))
                    .retention(StageResult::skipped(reason))
                    .build(),
                artifacts,
            ));
        };
        outcome = outcome.best_profile(profile, area);

        let endurance = match self.endurance(&t, &profile, &mut artifacts) {
            Ok(endurance) => endurance,
            Err(e) if e.is_abort() => {
                artifacts.log.push(Stage::Endurance, "aborted, keeping partial results");
                return Ok((
                    outcome
                        .note("aborted during endurance")
                        .endurance(StageResult::partial("aborted during endurance"))
                        .retention(StageResult::skipped("aborted during endurance"))
                        .build(),
                    artifacts,
                ));
            }
            Err(e) => return Err(e),
        };
        outcome = outcome.endurance(endurance);

        let retention = match self.retention(&t, &profile, &mut artifacts) {
            Ok(retention) => retention,
            Err(e) if e.is_abort() => {
                artifacts.log.push(Stage::Retention, "aborted, keeping partial results");
                outcome = outcome.note("aborted during retention");
                StageResult::partial("aborted during retention")
            }
            Err(e) => return Err(e),
        };

        Ok((outcome.retention(retention).build(), artifacts))
    }

    /// DC hold at the probe voltage; working iff mean current exceeds the floor.
    fn probe(&mut self, t: &Thresholds, artifacts: &mut RunArtifacts) -> Result<(bool, f64)> {
        let trace = self.driver.dc_hold(
            t.probe_voltage_v,
            t.probe_duration_s,
            t.probe_sample_hz,
            t.probe_compliance_a,
        )?;
        let mean = trace.mean_current();
        let working = mean > t.working_current_a;

        artifacts.log.push(
            Stage::Probe,
            format!(
                "{} V for {} s: mean {mean:.3e} A vs floor {:.3e} A -> {}",
                t.probe_voltage_v,
                t.probe_duration_s,
                t.working_current_a,
                if working { "working" } else { "not working" }
            ),
        );
        artifacts.probe_trace = Some(trace);
        Ok((working, mean))
    }

    /// Walk the forming ladder; returns the amplitude that formed the device.
    fn form(&mut self, t: &Thresholds, log: &mut AuditLog) -> Result<Option<f64>> {
        let ladder = t.forming_ladder();

        for (k, &voltage) in ladder.iter().enumerate() {
            if voltage.abs() > t.max_voltage_v {
                log.push(
                    Stage::Forming,
                    format!("step {voltage} V skipped: above {} V cap", t.max_voltage_v),
                );
                continue;
            }

            let trace = self.driver.triangle_sweep(&SweepSpec {
                v_min: 0.0,
                v_max: voltage,
                step_v: t.forming_step_v,
                dwell_s: t.forming_dwell_s,
                cycles: 1,
                compliance_a: t.forming_compliance_a,
            })?;

            let peak = trace.peak_abs_current();
            let area = trace.loop_area();
            let spiked = peak >= t.forming_spike_current_a;
            let looped = area >= t.forming_hysteresis_min;
            let formed = spiked || looped;

            log.push(
                Stage::Forming,
                format!(
                    "step {}/{} at {voltage} V: peak {peak:.3e} A, area {area:.3e} -> {}",
                    k + 1,
                    ladder.len(),
                    if formed { "formed" } else { "no switching" }
                ),
            );

            if formed {
                return Ok(Some(voltage));
            }
            if k + 1 < ladder.len() {
                self.driver.pause(t.forming_cooldown_s)?;
            }
        }

        Ok(None)
    }

    /// Brute-force search over the budgeted profiles.
    ///
    /// Keeps the strictly largest loop area; on an exact tie the profile
    /// seen first stays. A profile must beat zero area to be selected.
    fn search(
        &mut self,
        t: &Thresholds,
        artifacts: &mut RunArtifacts,
    ) -> Result<Option<(Profile, f64)>> {
        let profiles = t.search_profiles();
        let mut best: Option<(Profile, f64, MeasurementResult)> = None;
        let mut best_area = 0.0;

        for (k, profile) in profiles.iter().enumerate() {
            if profile.v_max() > t.max_voltage_v {
                artifacts.log.push(
                    Stage::Hysteresis,
                    format!(
                        "profile {}/{} ({profile}) skipped: above {} V cap",
                        k + 1,
                        profiles.len(),
                        t.max_voltage_v
                    ),
                );
                continue;
            }

            let trace = self.driver.triangle_sweep(&SweepSpec {
                v_min: -profile.v_max(),
                v_max: profile.v_max(),
                step_v: profile.step_v(),
                dwell_s: profile.dwell_s(),
                cycles: 1,
                compliance_a: profile.compliance_a(),
            })?;
            let area = trace.loop_area();
            let improved = area > best_area;

            artifacts.log.push(
                Stage::Hysteresis,
                format!(
                    "profile {}/{} ({profile}): area {area:.3e}{}",
                    k + 1,
                    profiles.len(),
                    if improved { " (best so far)" } else { "" }
                ),
            );

            if improved {
                best_area = area;
                best = Some((*profile, area, trace));
            }
        }

        Ok(best.map(|(profile, area, trace)| {
            artifacts.best_trace = Some(trace);
            (profile, area)
        }))
    }

    fn endurance(
        &mut self,
        t: &Thresholds,
        profile: &Profile,
        artifacts: &mut RunArtifacts,
    ) -> Result<StageResult<EnduranceSummary>> {
        let cycles = t.endurance_cycles.min(ENDURANCE_CYCLE_CAP);
        if cycles == 0 {
            return Ok(StageResult::skipped("endurance_cycles is 0"));
        }

        let readings = self.driver.endurance_pulses(&PulseSpec {
            set_v: t.endurance_set_v,
            reset_v: t.endurance_reset_v,
            width_s: t.endurance_pulse_s,
            read_v: t.endurance_read_v,
            cycles,
            compliance_a: profile.compliance_a(),
            stop: Some(FailureStop {
                ratio_below: t.endurance_abort_on_ratio_below,
                consecutive: t.endurance_abort_consec,
            }),
        })?;

        let ratios: Vec<f64> = readings.iter().map(|r| r.ratio).collect();
        let Some(median_ratio) = metrics::median(&ratios) else {
            return Ok(StageResult::partial("no endurance cycle completed"));
        };
        let summary = EnduranceSummary {
            median_ratio,
            cycles_run: readings.len(),
            stopped_early: readings.len() < cycles,
        };

        artifacts.log.push(
            Stage::Endurance,
            format!(
                "{}/{cycles} cycles, median on/off ratio {median_ratio:.3}{}",
                summary.cycles_run,
                if summary.stopped_early {
                    format!(
                        " (stopped after {} consecutive cycles below {})",
                        t.endurance_abort_consec, t.endurance_abort_on_ratio_below
                    )
                } else {
                    String::new()
                }
            ),
        );
        artifacts.endurance_cycles = readings;
        Ok(StageResult::Completed(summary))
    }

    fn retention(
        &mut self,
        t: &Thresholds,
        profile: &Profile,
        artifacts: &mut RunArtifacts,
    ) -> Result<StageResult<RetentionSummary>> {
        if t.retention_times_s.is_empty() {
            return Ok(StageResult::skipped("no retention times configured"));
        }

        // One more SET/RESET/READ cycle before the clock starts
        self.driver.endurance_pulses(&PulseSpec {
            set_v: t.endurance_set_v,
            reset_v: t.endurance_reset_v,
            width_s: t.endurance_pulse_s,
            read_v: t.endurance_read_v,
            cycles: 1,
            compliance_a: profile.compliance_a(),
            stop: None,
        })?;

        let currents = self.driver.retention_reads(
            t.retention_read_v,
            &t.retention_times_s,
            profile.compliance_a(),
        )?;
        let alpha = metrics::retention_alpha(&t.retention_times_s, &currents);

        artifacts.log.push(
            Stage::Retention,
            format!(
                "{} reads up to {} s: alpha {alpha:.3}",
                currents.len(),
                t.retention_times_s.iter().copied().fold(0.0_f64, f64::max)
            ),
        );
        artifacts.retention_reads = t
            .retention_times_s
            .iter()
            .copied()
            .zip(currents.iter().copied())
            .collect();

        Ok(StageResult::Completed(RetentionSummary {
            alpha,
            times_s: t.retention_times_s.clone(),
            currents_a: currents,
        }))
    }
}
