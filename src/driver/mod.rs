//! Measurement driver: bounded, cancellable control loops over an [`Instrument`]
//!
//! Four operations cover every stage of the pipeline:
//!
//! | Operation            | Used by                 | Returns               |
//! |----------------------|-------------------------|-----------------------|
//! | [`dc_hold`]          | probe                   | [`MeasurementResult`] |
//! | [`triangle_sweep`]   | forming, hysteresis     | [`MeasurementResult`] |
//! | [`endurance_pulses`] | endurance, retention    | [`CycleReading`]s     |
//! | [`retention_reads`]  | retention               | currents              |
//!
//! ## Safety
//!
//! - Abort is cooperative: the predicate is polled before every sample and
//!   on every wait tick. When it fires, output is disabled **first** and only
//!   then is [`Error::InstrumentAborted`] returned.
//! - Set-points beyond [`SafetyLimits::max_voltage_v`] are refused before the
//!   instrument is touched; compliance is clamped to the cap.
//! - Any other failure inside a loop triggers a best-effort output disable
//!   and is passed through unchanged. There are no retries.
//!
//! [`dc_hold`]: MeasurementDriver::dc_hold
//! [`triangle_sweep`]: MeasurementDriver::triangle_sweep
//! [`endurance_pulses`]: MeasurementDriver::endurance_pulses
//! [`retention_reads`]: MeasurementDriver::retention_reads

mod clock;
mod instrument;
mod observer;
mod trace;

pub use clock::{Clock, Deadline, ManualClock, SystemClock};
pub use instrument::{Instrument, InstrumentError};
pub use observer::{ChannelObserver, CycleReading, MeasurementEvent, MeasurementObserver};
pub use trace::{MeasurementResult, Sample};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metrics::{on_off_ratio, DEFAULT_EPS};
use crate::{Error, Result};

/// Default coarse polling interval for waits
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Hard caps applied to every driver operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Largest allowed |set-point| (volts)
    pub max_voltage_v: f64,
    /// Largest allowed compliance (amps); larger requests are clamped
    pub max_compliance_a: f64,
    /// Largest allowed |Δi|/Δt between consecutive hold/sweep samples (A/s)
    pub max_current_slew_a_per_s: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_voltage_v: 10.0,
            max_compliance_a: 0.1,
            max_current_slew_a_per_s: 1.0,
        }
    }
}

/// Parameters of a triangle sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSpec {
    /// Lower turning point (volts)
    pub v_min: f64,
    /// Upper turning point (volts)
    pub v_max: f64,
    /// Voltage increment between points
    pub step_v: f64,
    /// Settling time at each point before the reading (seconds)
    pub dwell_s: f64,
    /// Number of full `0 → v_max → v_min → 0` repetitions
    pub cycles: usize,
    /// Current compliance (amps)
    pub compliance_a: f64,
}

impl SweepSpec {
    /// Ordered set-points for the whole sweep, all cycles concatenated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a non-positive or non-finite step,
    /// non-finite turning points, or zero cycles.
    pub fn points(&self) -> Result<Vec<f64>> {
        if !(self.step_v.is_finite() && self.step_v > 0.0) {
            return Err(Error::InvalidInput(format!(
                "sweep step must be positive, got {}",
                self.step_v
            )));
        }
        if !(self.v_min.is_finite() && self.v_max.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "sweep turning points must be finite, got {}..{}",
                self.v_min, self.v_max
            )));
        }
        if self.cycles == 0 {
            return Err(Error::InvalidInput("sweep needs at least 1 cycle".to_string()));
        }

        let mut one_cycle = sweep_leg(0.0, self.v_max, self.step_v);
        one_cycle.extend(sweep_leg(self.v_max, self.v_min, self.step_v));
        one_cycle.extend(sweep_leg(self.v_min, 0.0, self.step_v));

        Ok(one_cycle.repeat(self.cycles))
    }
}

/// Points from `start` to `stop` in increments of `step`, both ends included.
///
/// The last increment is shortened to land exactly on `stop`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn sweep_leg(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let span = stop - start;
    let steps = (span.abs() / step - 1e-9).ceil().max(0.0) as usize;
    let direction = span.signum();

    let mut points: Vec<f64> = (0..steps)
        .map(|k| direction.mul_add(step * k as f64, start))
        .collect();
    points.push(stop);
    points
}

/// Early-stop rule for endurance cycling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureStop {
    /// A cycle fails when its on/off ratio is below this floor
    pub ratio_below: f64,
    /// Stop once this many consecutive cycles failed (0 disables the rule)
    pub consecutive: usize,
}

/// Parameters of an endurance pulse train.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseSpec {
    /// SET pulse amplitude (volts)
    pub set_v: f64,
    /// RESET pulse amplitude (volts)
    pub reset_v: f64,
    /// Pulse width (seconds)
    pub width_s: f64,
    /// Read voltage (volts)
    pub read_v: f64,
    /// Maximum number of cycles
    pub cycles: usize,
    /// Current compliance (amps)
    pub compliance_a: f64,
    /// Optional consecutive-failure stop
    pub stop: Option<FailureStop>,
}

/// Drives one instrument through hold, sweep, pulse and retention loops.
///
/// The driver owns the instrument for its whole lifetime; nothing else can
/// talk to the hardware while a measurement is running.
///
/// # Example
///
/// ```rust,no_run
/// use memristor_pipeline::driver::{Instrument, InstrumentError, MeasurementDriver};
///
/// struct Smu;
/// impl Instrument for Smu {
///     fn set_voltage(&mut self, _v: f64, _c: f64) -> Result<(), InstrumentError> { Ok(()) }
///     fn enable_output(&mut self, _on: bool) -> Result<(), InstrumentError> { Ok(()) }
///     fn measure_current(&mut self) -> Result<f64, InstrumentError> { Ok(1e-6) }
/// }
///
/// let mut driver = MeasurementDriver::new(Smu);
/// let trace = driver.dc_hold(0.2, 1.0, 10.0, 1e-4)?;
/// println!("mean current: {:e} A", trace.mean_current());
/// # Ok::<(), memristor_pipeline::Error>(())
/// ```
pub struct MeasurementDriver<I, C = SystemClock> {
    instrument: I,
    clock: C,
    abort: Box<dyn Fn() -> bool>,
    observers: Vec<Box<dyn MeasurementObserver>>,
    limits: SafetyLimits,
    poll_interval: Duration,
}

impl<I: Instrument> MeasurementDriver<I, SystemClock> {
    /// Create a driver on the wall clock.
    #[must_use]
    pub fn new(instrument: I) -> Self {
        Self::with_clock(instrument, SystemClock::new())
    }
}

impl<I: Instrument, C: Clock> MeasurementDriver<I, C> {
    /// Create a driver on an explicit clock.
    #[must_use]
    pub fn with_clock(instrument: I, clock: C) -> Self {
        Self {
            instrument,
            clock,
            abort: Box::new(|| false),
            observers: Vec::new(),
            limits: SafetyLimits::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the abort predicate polled at every sampling point.
    #[must_use]
    pub fn with_abort(mut self, abort: impl Fn() -> bool + 'static) -> Self {
        self.abort = Box::new(abort);
        self
    }

    /// Attach a progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: impl MeasurementObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Set the safety caps.
    #[must_use]
    pub const fn with_limits(mut self, limits: SafetyLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the coarse polling interval used while waiting.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replace the safety caps.
    pub fn set_limits(&mut self, limits: SafetyLimits) {
        self.limits = limits;
    }

    /// Current safety caps.
    #[must_use]
    pub const fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Borrow the instrument.
    #[must_use]
    pub const fn instrument(&self) -> &I {
        &self.instrument
    }

    /// Borrow the clock.
    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Sleep on the driver's clock, polling abort.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstrumentAborted`] (after disabling output) if the
    /// abort predicate fires while waiting.
    pub fn pause(&mut self, seconds: f64) -> Result<()> {
        let duration = to_duration("pause", seconds)?;
        let deadline = Deadline::after(self.clock.now(), duration);
        self.wait_until(deadline)
    }

    /// Hold `voltage` and sample current at `sample_rate_hz` for `duration_s`.
    ///
    /// At least one sample is always taken. Output is disabled on return.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for a non-positive rate or negative duration
    /// - [`Error::SafetyLimit`] if `voltage` exceeds the cap or current slews too fast
    /// - [`Error::InstrumentAborted`] if the abort predicate fires
    /// - [`Error::Instrument`] for transport failures
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn dc_hold(
        &mut self,
        voltage: f64,
        duration_s: f64,
        sample_rate_hz: f64,
        compliance_a: f64,
    ) -> Result<MeasurementResult> {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(Error::InvalidInput(format!(
                "sample rate must be positive, got {sample_rate_hz}"
            )));
        }
        to_duration("hold duration", duration_s)?;
        self.check_voltage(voltage)?;
        let compliance = self.clamp_compliance(compliance_a)?;

        let period = 1.0 / sample_rate_hz;
        let count = ((duration_s * sample_rate_hz).round() as usize).max(1);
        info!(voltage, duration_s, sample_rate_hz, count, "dc hold");

        self.guarded(|d| {
            d.apply(voltage, compliance)?;
            d.output(true)?;

            let start = d.clock.now();
            let mut trace = MeasurementResult::with_capacity(count);
            let mut previous = None;
            for k in 0..count {
                d.wait_until(Deadline::after(
                    start,
                    Duration::from_secs_f64(period * k as f64),
                ))?;
                let sample = d.sample(voltage, start)?;
                d.check_slew(previous, &sample)?;
                trace.push(sample)?;
                d.emit(&MeasurementEvent::Sample(sample));
                previous = Some(sample);
            }

            d.output(false)?;
            Ok(trace)
        })
    }

    /// Triangle sweep `0 → v_max → v_min → 0`, repeated `spec.cycles` times.
    ///
    /// Every set-point is held for `dwell_s` and then read. All legs of all
    /// cycles land in one continuous trace.
    ///
    /// # Errors
    ///
    /// Same as [`dc_hold`](Self::dc_hold); the voltage cap is checked for
    /// every point before output is enabled.
    pub fn triangle_sweep(&mut self, spec: &SweepSpec) -> Result<MeasurementResult> {
        let points = spec.points()?;
        let dwell = to_duration("dwell", spec.dwell_s)?;
        for &point in &points {
            self.check_voltage(point)?;
        }
        let compliance = self.clamp_compliance(spec.compliance_a)?;
        info!(
            v_min = spec.v_min,
            v_max = spec.v_max,
            step_v = spec.step_v,
            cycles = spec.cycles,
            points = points.len(),
            "triangle sweep"
        );

        self.guarded(|d| {
            d.apply(points[0], compliance)?;
            d.output(true)?;

            let start = d.clock.now();
            let mut trace = MeasurementResult::with_capacity(points.len());
            let mut previous = None;
            for &point in &points {
                d.check_abort()?;
                d.apply(point, compliance)?;
                let settle = Deadline::after(d.clock.now(), dwell);
                d.wait_until(settle)?;
                let sample = d.sample(point, start)?;
                d.check_slew(previous, &sample)?;
                trace.push(sample)?;
                d.emit(&MeasurementEvent::Sample(sample));
                previous = Some(sample);
            }

            d.output(false)?;
            Ok(trace)
        })
    }

    /// SET / READ / RESET / READ cycling.
    ///
    /// Each cycle reports its [`CycleReading`] to observers. With a
    /// [`FailureStop`] the train ends as soon as the configured number of
    /// consecutive cycles fell below the ratio floor; the readings taken so
    /// far are returned.
    ///
    /// # Errors
    ///
    /// Same as [`dc_hold`](Self::dc_hold).
    pub fn endurance_pulses(&mut self, spec: &PulseSpec) -> Result<Vec<CycleReading>> {
        let width = to_duration("pulse width", spec.width_s)?;
        for v in [spec.set_v, spec.reset_v, spec.read_v] {
            self.check_voltage(v)?;
        }
        let compliance = self.clamp_compliance(spec.compliance_a)?;
        info!(
            set_v = spec.set_v,
            reset_v = spec.reset_v,
            read_v = spec.read_v,
            cycles = spec.cycles,
            "endurance pulses"
        );

        self.guarded(|d| {
            d.apply(spec.read_v, compliance)?;
            d.output(true)?;

            let mut readings = Vec::with_capacity(spec.cycles);
            let mut consecutive_failures = 0usize;
            for index in 0..spec.cycles {
                d.check_abort()?;
                let i_on = d.pulse_then_read(spec.set_v, spec.read_v, width, compliance)?;
                let i_off = d.pulse_then_read(spec.reset_v, spec.read_v, width, compliance)?;

                let reading = CycleReading {
                    index,
                    i_on,
                    i_off,
                    ratio: on_off_ratio(i_on, i_off, DEFAULT_EPS),
                };
                debug!(index, i_on, i_off, ratio = reading.ratio, "endurance cycle");
                d.emit(&MeasurementEvent::Cycle(reading));
                readings.push(reading);

                if let Some(stop) = spec.stop {
                    if reading.ratio < stop.ratio_below {
                        consecutive_failures += 1;
                    } else {
                        consecutive_failures = 0;
                    }
                    if stop.consecutive > 0 && consecutive_failures >= stop.consecutive {
                        warn!(
                            cycles_run = readings.len(),
                            consecutive_failures, "endurance stopped early"
                        );
                        break;
                    }
                }
            }

            d.output(false)?;
            Ok(readings)
        })
    }

    /// Read at `read_v` once each requested elapsed time has passed.
    ///
    /// The timer restarts on entry. Times are visited in ascending order,
    /// but readings come back in the order of `times_s`. Output is only on
    /// for the duration of each read.
    ///
    /// # Errors
    ///
    /// Same as [`dc_hold`](Self::dc_hold); negative or non-finite times are
    /// rejected up front.
    pub fn retention_reads(
        &mut self,
        read_v: f64,
        times_s: &[f64],
        compliance_a: f64,
    ) -> Result<Vec<f64>> {
        let offsets = times_s
            .iter()
            .map(|&t| to_duration("retention time", t))
            .collect::<Result<Vec<_>>>()?;
        self.check_voltage(read_v)?;
        let compliance = self.clamp_compliance(compliance_a)?;

        let mut order: Vec<usize> = (0..offsets.len()).collect();
        order.sort_by_key(|&k| offsets[k]);
        info!(read_v, reads = offsets.len(), "retention reads");

        self.guarded(|d| {
            let start = d.clock.now();
            let mut readings = vec![0.0; offsets.len()];
            for index in order {
                d.wait_until(Deadline::after(start, offsets[index]))?;
                d.apply(read_v, compliance)?;
                d.output(true)?;
                let current_a = d.read()?;
                d.output(false)?;

                let elapsed_s = d.clock.now().saturating_sub(start).as_secs_f64();
                debug!(index, elapsed_s, current_a, "retention read");
                d.emit(&MeasurementEvent::Read {
                    index,
                    elapsed_s,
                    current_a,
                });
                readings[index] = current_a;
            }
            Ok(readings)
        })
    }

    /// Run `op`; on any failure other than abort, try to disable output
    /// before handing the original error back.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        if let Err(err) = &result {
            if !err.is_abort() {
                if let Err(disable_err) = self.instrument.enable_output(false) {
                    warn!(error = %disable_err, "failed to disable output after error");
                }
            }
        }
        result
    }

    fn check_abort(&mut self) -> Result<()> {
        if (self.abort)() {
            warn!("abort requested, disabling output");
            self.output(false)?;
            return Err(Error::InstrumentAborted);
        }
        Ok(())
    }

    /// Wait on the clock in coarse ticks, checking abort on every tick.
    fn wait_until(&mut self, deadline: Deadline) -> Result<()> {
        loop {
            self.check_abort()?;
            let remaining = deadline.remaining(&self.clock);
            if remaining.is_zero() {
                return Ok(());
            }
            let tick = if self.poll_interval.is_zero() {
                remaining
            } else {
                remaining.min(self.poll_interval)
            };
            self.clock.sleep(tick);
        }
    }

    fn pulse_then_read(
        &mut self,
        pulse_v: f64,
        read_v: f64,
        width: Duration,
        compliance: f64,
    ) -> Result<f64> {
        self.apply(pulse_v, compliance)?;
        let end = Deadline::after(self.clock.now(), width);
        self.wait_until(end)?;
        self.apply(read_v, compliance)?;
        self.read()
    }

    fn sample(&mut self, voltage: f64, start: Duration) -> Result<Sample> {
        let current = self.read()?;
        let elapsed = self.clock.now().saturating_sub(start).as_secs_f64();
        Ok(Sample::new(voltage, current, elapsed))
    }

    fn check_voltage(&self, voltage: f64) -> Result<()> {
        if !voltage.is_finite() || voltage.abs() > self.limits.max_voltage_v {
            return Err(Error::SafetyLimit(format!(
                "set-point {voltage} V outside ±{} V",
                self.limits.max_voltage_v
            )));
        }
        Ok(())
    }

    fn clamp_compliance(&self, compliance: f64) -> Result<f64> {
        if !(compliance.is_finite() && compliance > 0.0) {
            return Err(Error::InvalidInput(format!(
                "compliance must be positive, got {compliance}"
            )));
        }
        if compliance > self.limits.max_compliance_a {
            warn!(
                requested = compliance,
                cap = self.limits.max_compliance_a,
                "compliance clamped to safety cap"
            );
            return Ok(self.limits.max_compliance_a);
        }
        Ok(compliance)
    }

    fn check_slew(&self, previous: Option<Sample>, current: &Sample) -> Result<()> {
        let Some(previous) = previous else {
            return Ok(());
        };
        let dt = current.elapsed_s - previous.elapsed_s;
        if dt <= 0.0 {
            return Ok(());
        }
        let slew = (current.current_a - previous.current_a).abs() / dt;
        if slew > self.limits.max_current_slew_a_per_s {
            return Err(Error::SafetyLimit(format!(
                "current slew {slew:.3e} A/s above {:.3e} A/s",
                self.limits.max_current_slew_a_per_s
            )));
        }
        Ok(())
    }

    fn apply(&mut self, voltage: f64, compliance: f64) -> Result<()> {
        self.check_voltage(voltage)?;
        self.instrument
            .set_voltage(voltage, compliance)
            .map_err(Error::Instrument)
    }

    fn output(&mut self, enabled: bool) -> Result<()> {
        self.instrument
            .enable_output(enabled)
            .map_err(Error::Instrument)
    }

    fn read(&mut self) -> Result<f64> {
        self.instrument.measure_current().map_err(Error::Instrument)
    }

    fn emit(&mut self, event: &MeasurementEvent) {
        for observer in &mut self.observers {
            observer.on_event(event);
        }
    }
}

fn to_duration(what: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        Error::InvalidInput(format!(
            "{what} must be a finite, non-negative number of seconds, got {seconds}"
        ))
    })
}
