//! Instrument contract consumed by the driver.
//!
//! This is the entire footprint on the hardware layer: a two-terminal
//! source-measure unit that can hold a voltage under a current compliance,
//! switch its output and read back current. Transport (GPIB, VISA, KXCI)
//! and vendor command encoding live behind implementations of this trait.

/// Boxed transport error returned by an [`Instrument`].
///
/// The driver never inspects or rewraps it beyond placing it in
/// [`Error::Instrument`](crate::Error::Instrument), so the original error is
/// available through `source()`.
pub type InstrumentError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Minimal source-measure unit contract.
///
/// Implementations are driven from a single thread and are owned
/// exclusively by one [`MeasurementDriver`](super::MeasurementDriver).
pub trait Instrument {
    /// Enter (or stay in) voltage-source mode at `value` volts with a
    /// current compliance of `compliance` amps.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be applied.
    fn set_voltage(&mut self, value: f64, compliance: f64) -> Result<(), InstrumentError>;

    /// Switch the source output on or off.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be applied.
    fn enable_output(&mut self, enabled: bool) -> Result<(), InstrumentError>;

    /// Read the present current in amps.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the reading failed.
    fn measure_current(&mut self) -> Result<f64, InstrumentError>;
}

impl<T: Instrument + ?Sized> Instrument for Box<T> {
    fn set_voltage(&mut self, value: f64, compliance: f64) -> Result<(), InstrumentError> {
        (**self).set_voltage(value, compliance)
    }

    fn enable_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        (**self).enable_output(enabled)
    }

    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        (**self).measure_current()
    }
}
