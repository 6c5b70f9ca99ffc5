//! Behavioural memristor model behind the [`Instrument`] contract
//!
//! Good enough to exercise every branch of the pipeline without hardware:
//!
//! - a pristine device conducts almost nothing until a bias of at least
//!   `forming_v` is applied, after which it switches to the ON state;
//! - a formed device drifts its state `w ∈ [0, 1]` toward ON above `set_v`
//!   and toward OFF below `reset_v`, proportional to overdrive and time;
//! - between programming events the state relaxes as a power law,
//!   `w(t) = w₀·(1 + t/τ)^(−α)`;
//! - current is `(g_off + w·(g_on − g_off))·v`, clipped at compliance.
//!
//! Time comes from an injected [`Clock`], so a [`ManualClock`] shared with
//! the driver makes the whole model deterministic.
//!
//! [`ManualClock`]: crate::driver::ManualClock

use std::time::Duration;

use crate::driver::{Clock, Instrument, InstrumentError, SystemClock};

/// Physical parameters of the simulated device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceParams {
    /// Bias magnitude that forms a pristine device (volts)
    pub forming_v: f64,
    /// SET threshold (volts, positive)
    pub set_v: f64,
    /// RESET threshold (volts, negative)
    pub reset_v: f64,
    /// ON-state conductance (siemens)
    pub g_on: f64,
    /// OFF-state conductance (siemens)
    pub g_off: f64,
    /// Conductance before forming (siemens)
    pub g_pristine: f64,
    /// State change per volt of overdrive per second
    pub switching_rate: f64,
    /// Relaxation time constant (seconds)
    pub retention_tau_s: f64,
    /// Relaxation power-law exponent
    pub retention_alpha: f64,
    /// Start already formed
    pub pre_formed: bool,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            forming_v: 2.0,
            set_v: 0.8,
            reset_v: -0.8,
            g_on: 1e-4,
            g_off: 1e-6,
            g_pristine: 1e-10,
            switching_rate: 20.0,
            retention_tau_s: 1.0,
            retention_alpha: 0.3,
            pre_formed: false,
        }
    }
}

/// Simulated two-terminal memristor on a source-measure unit.
pub struct SimulatedMemristor {
    params: DeviceParams,
    clock: Box<dyn Clock>,
    voltage: f64,
    compliance: f64,
    output: bool,
    formed: bool,
    state: f64,
    programmed_at: Duration,
    last_update: Duration,
}

impl Default for SimulatedMemristor {
    fn default() -> Self {
        Self::new(DeviceParams::default())
    }
}

impl SimulatedMemristor {
    /// Device on the wall clock.
    #[must_use]
    pub fn new(params: DeviceParams) -> Self {
        Self::with_clock(params, SystemClock::new())
    }

    /// Device on an explicit clock.
    #[must_use]
    pub fn with_clock(params: DeviceParams, clock: impl Clock + 'static) -> Self {
        let now = clock.now();
        Self {
            params,
            clock: Box::new(clock),
            voltage: 0.0,
            compliance: 0.0,
            output: false,
            formed: params.pre_formed,
            state: if params.pre_formed { 1.0 } else { 0.0 },
            programmed_at: now,
            last_update: now,
        }
    }

    /// Whether the device has been formed.
    #[must_use]
    pub const fn is_formed(&self) -> bool {
        self.formed
    }

    /// Present (relaxed) state variable.
    #[must_use]
    pub fn state(&self) -> f64 {
        self.relaxed_state(self.clock.now())
    }

    fn relaxed_state(&self, now: Duration) -> f64 {
        let idle = now.saturating_sub(self.programmed_at).as_secs_f64();
        self.state * (1.0 + idle / self.params.retention_tau_s).powf(-self.params.retention_alpha)
    }

    /// Apply the held bias for the time since the last interaction.
    fn advance(&mut self) {
        let now = self.clock.now();
        let dt = now.saturating_sub(self.last_update).as_secs_f64();
        self.last_update = now;

        if !self.output {
            return;
        }

        let p = self.params;
        let v = self.voltage;
        if !self.formed {
            if v.abs() >= p.forming_v {
                self.formed = true;
                self.state = 1.0;
                self.programmed_at = now;
            }
            return;
        }

        let drift = if v > p.set_v {
            p.switching_rate * (v - p.set_v)
        } else if v < p.reset_v {
            -p.switching_rate * (p.reset_v - v)
        } else {
            return;
        };

        self.state = drift.mul_add(dt, self.relaxed_state(now)).clamp(0.0, 1.0);
        self.programmed_at = now;
    }
}

impl Instrument for SimulatedMemristor {
    fn set_voltage(&mut self, value: f64, compliance: f64) -> Result<(), InstrumentError> {
        self.advance();
        self.voltage = value;
        self.compliance = compliance;
        Ok(())
    }

    fn enable_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        self.advance();
        self.output = enabled;
        Ok(())
    }

    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        self.advance();
        if !self.output {
            return Ok(0.0);
        }

        let p = self.params;
        let v = self.voltage;
        if !self.formed && v.abs() >= p.forming_v {
            self.formed = true;
            self.state = 1.0;
            self.programmed_at = self.clock.now();
        }

        let conductance = if self.formed {
            self.relaxed_state(self.clock.now())
                .mul_add(p.g_on - p.g_off, p.g_off)
        } else {
            p.g_pristine
        };
        let limit = self.compliance.abs();
        Ok((conductance * v).clamp(-limit, limit))
    }
}
