//! Progress reporting out of the measurement loops.
//!
//! The driver pushes a [`MeasurementEvent`] to every attached observer as
//! soon as a sample, cycle or retention read is taken. Live plotting and
//! logging sit on the other side of this seam.

use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

use super::trace::Sample;

/// One SET/RESET/READ cycle of an endurance run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleReading {
    /// Zero-based cycle index
    pub index: usize,
    /// Read current after the SET pulse (amps)
    pub i_on: f64,
    /// Read current after the RESET pulse (amps)
    pub i_off: f64,
    /// `on_off_ratio(i_on, i_off)`
    pub ratio: f64,
}

/// Event emitted by a driver operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MeasurementEvent {
    /// Hold or sweep sample
    Sample(Sample),
    /// Completed endurance cycle
    Cycle(CycleReading),
    /// Retention read
    Read {
        /// Position in the caller's `times` list
        index: usize,
        /// Actual elapsed time at the read (seconds)
        elapsed_s: f64,
        /// Read current (amps)
        current_a: f64,
    },
}

/// Receiver of driver progress events.
pub trait MeasurementObserver {
    /// Called synchronously from inside the measurement loop.
    fn on_event(&mut self, event: &MeasurementEvent);
}

impl<F> MeasurementObserver for F
where
    F: FnMut(&MeasurementEvent),
{
    fn on_event(&mut self, event: &MeasurementEvent) {
        self(event);
    }
}

/// Forwards events into an mpsc channel.
///
/// A dropped receiver does not stop the measurement; events are discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver(Sender<MeasurementEvent>);

impl ChannelObserver {
    /// Wrap the sending half of a channel.
    #[must_use]
    pub const fn new(sender: Sender<MeasurementEvent>) -> Self {
        Self(sender)
    }
}

impl MeasurementObserver for ChannelObserver {
    fn on_event(&mut self, event: &MeasurementEvent) {
        let _ = self.0.send(*event);
    }
}
