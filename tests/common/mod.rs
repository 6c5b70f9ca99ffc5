//! Scripted instrument fixture shared by the integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use memristor_pipeline::driver::{Instrument, InstrumentError};

/// One call made against the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Call {
    SetVoltage(f64, f64),
    EnableOutput(bool),
    Measure,
}

/// Shared, inspectable record of every instrument call.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<Call>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    pub fn measure_count(&self) -> usize {
        self.0.borrow().iter().filter(|c| **c == Call::Measure).count()
    }

    pub fn output_count(&self, enabled: bool) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|c| **c == Call::EnableOutput(enabled))
            .count()
    }

    pub fn saw_voltage(&self, voltage: f64) -> bool {
        self.0
            .borrow()
            .iter()
            .any(|c| matches!(c, Call::SetVoltage(v, _) if (*v - voltage).abs() < 1e-12))
    }

    /// Set-points applied while output was on.
    pub fn live_set_points(&self) -> Vec<f64> {
        let mut on = false;
        let mut points = Vec::new();
        for call in self.0.borrow().iter() {
            match call {
                Call::EnableOutput(enabled) => on = *enabled,
                Call::SetVoltage(v, _) if on => points.push(*v),
                _ => {}
            }
        }
        points
    }

    fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }
}

/// What the model sees when asked for a current.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    /// Present set-point
    pub voltage: f64,
    /// +1 after a rising set-point, -1 after a falling one
    pub direction: f64,
    /// Zero-based index of this measurement
    pub index: usize,
}

type Model = Box<dyn FnMut(Probe) -> f64>;

/// Instrument whose current comes from a closure.
pub struct ScriptedInstrument {
    log: CallLog,
    model: Model,
    voltage: f64,
    direction: f64,
    measured: usize,
    fail_on_measure: Option<usize>,
}

impl ScriptedInstrument {
    pub fn new(model: impl FnMut(Probe) -> f64 + 'static) -> (Self, CallLog) {
        let log = CallLog::default();
        (
            Self {
                log: log.clone(),
                model: Box::new(model),
                voltage: 0.0,
                direction: 1.0,
                measured: 0,
                fail_on_measure: None,
            },
            log,
        )
    }

    /// Constant current regardless of bias.
    pub fn constant(current: f64) -> (Self, CallLog) {
        Self::new(move |_| current)
    }

    /// Fail the `n`-th measurement (zero-based) with a transport error.
    pub fn failing_at(mut self, n: usize) -> Self {
        self.fail_on_measure = Some(n);
        self
    }
}

impl Instrument for ScriptedInstrument {
    fn set_voltage(&mut self, value: f64, compliance: f64) -> Result<(), InstrumentError> {
        if value > self.voltage {
            self.direction = 1.0;
        } else if value < self.voltage {
            self.direction = -1.0;
        }
        self.voltage = value;
        self.log.push(Call::SetVoltage(value, compliance));
        Ok(())
    }

    fn enable_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        self.log.push(Call::EnableOutput(enabled));
        Ok(())
    }

    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        let index = self.measured;
        self.measured += 1;
        self.log.push(Call::Measure);
        if self.fail_on_measure == Some(index) {
            return Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "GPIB read timeout",
            )));
        }
        Ok((self.model)(Probe {
            voltage: self.voltage,
            direction: self.direction,
            index,
        }))
    }
}

/// Ohmic device with a direction-dependent offset: loop area grows with
/// sweep amplitude.
pub fn hysteretic(conductance: f64, offset: f64) -> impl FnMut(Probe) -> f64 {
    move |p: Probe| conductance * p.voltage + offset * p.direction
}
