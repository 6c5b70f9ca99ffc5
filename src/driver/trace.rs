//! Raw measurement traces

use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::{Error, Result};

/// A single `(v, i, t)` point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Applied voltage (volts)
    pub voltage_v: f64,
    /// Measured current (amps)
    pub current_a: f64,
    /// Elapsed time since the start of the operation (seconds)
    pub elapsed_s: f64,
}

impl Sample {
    /// Create a sample.
    #[must_use]
    pub const fn new(voltage_v: f64, current_a: f64, elapsed_s: f64) -> Self {
        Self {
            voltage_v,
            current_a,
            elapsed_s,
        }
    }
}

/// Output of exactly one driver call: three equal-length, ordered columns.
///
/// Columns stay equal length and timestamps stay non-decreasing; both are
/// checked on every construction path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    voltage: Vec<f64>,
    current: Vec<f64>,
    timestamps: Vec<f64>,
}

impl MeasurementResult {
    /// Create an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty trace with room for `capacity` samples.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            voltage: Vec::with_capacity(capacity),
            current: Vec::with_capacity(capacity),
            timestamps: Vec::with_capacity(capacity),
        }
    }

    /// Build a trace from columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTrace`] if the columns differ in length or the
    /// timestamps decrease anywhere.
    pub fn from_columns(voltage: Vec<f64>, current: Vec<f64>, timestamps: Vec<f64>) -> Result<Self> {
        if voltage.len() != current.len() || voltage.len() != timestamps.len() {
            return Err(Error::InvalidTrace(format!(
                "column lengths differ: voltage={}, current={}, timestamps={}",
                voltage.len(),
                current.len(),
                timestamps.len()
            )));
        }
        if let Some(k) = timestamps.windows(2).position(|w| w[1] < w[0]) {
            return Err(Error::InvalidTrace(format!(
                "timestamps decrease at index {}: {} -> {}",
                k + 1,
                timestamps[k],
                timestamps[k + 1]
            )));
        }

        Ok(Self {
            voltage,
            current,
            timestamps,
        })
    }

    /// Append a sample.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTrace`] if the sample is older than the last one.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        if let Some(&last) = self.timestamps.last() {
            if sample.elapsed_s < last {
                return Err(Error::InvalidTrace(format!(
                    "timestamp {} precedes previous sample at {last}",
                    sample.elapsed_s
                )));
            }
        }
        self.voltage.push(sample.voltage_v);
        self.current.push(sample.current_a);
        self.timestamps.push(sample.elapsed_s);
        Ok(())
    }

    /// Voltage column.
    #[must_use]
    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    /// Current column.
    #[must_use]
    pub fn current(&self) -> &[f64] {
        &self.current
    }

    /// Elapsed-time column (seconds).
    #[must_use]
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    /// True if no samples were taken.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    /// Iterate samples in acquisition order.
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.voltage
            .iter()
            .zip(&self.current)
            .zip(&self.timestamps)
            .map(|((&v, &i), &t)| Sample::new(v, i, t))
    }

    /// Mean current; `0.0` when empty.
    #[must_use]
    pub fn mean_current(&self) -> f64 {
        metrics::mean(&self.current)
    }

    /// Largest absolute current; `0.0` when empty.
    #[must_use]
    pub fn peak_abs_current(&self) -> f64 {
        self.current.iter().fold(0.0_f64, |acc, i| acc.max(i.abs()))
    }

    /// Loop area of this trace in acquisition order.
    #[must_use]
    pub fn loop_area(&self) -> f64 {
        metrics::hysteresis_loop_area(&self.voltage, &self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_columns_rejects_length_mismatch() {
        let err = MeasurementResult::from_columns(vec![0.0, 1.0], vec![0.0], vec![0.0, 0.1])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTrace(_)));
    }

    #[test]
    fn test_from_columns_rejects_time_reversal() {
        let err =
            MeasurementResult::from_columns(vec![0.0, 1.0], vec![0.0, 1.0], vec![0.2, 0.1])
                .unwrap_err();
        assert!(format!("{err}").contains("index 1"));
    }

    #[test]
    fn test_push_keeps_columns_aligned() {
        let mut trace = MeasurementResult::new();
        trace.push(Sample::new(0.1, 1e-6, 0.0)).unwrap();
        trace.push(Sample::new(0.2, 2e-6, 0.0)).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.voltage().len(), trace.timestamps().len());
        assert!(trace.push(Sample::new(0.3, 3e-6, -1.0)).is_err());
        assert_eq!(trace.len(), 2);
    }

    #[test]
    fn test_summary_values() {
        let trace = MeasurementResult::from_columns(
            vec![0.1, 0.1, 0.1],
            vec![1e-6, -3e-6, 2e-6],
            vec![0.0, 0.1, 0.2],
        )
        .unwrap();
        assert!((trace.mean_current() - 0.0).abs() < 1e-18);
        assert!((trace.peak_abs_current() - 3e-6).abs() < 1e-18);
        assert_eq!(trace.samples().count(), 3);
    }
}
