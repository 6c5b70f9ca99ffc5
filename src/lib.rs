//! # memristor-pipeline: Adaptive Memristor Characterization
//!
//! Control logic that walks a two-terminal source-measure unit through a
//! multi-stage electrical test of a memristive device under test (DUT),
//! plus the metrics that score each stage:
//!
//! ```text
//! probe → (forming) → hysteresis search → endurance → retention
//! ```
//!
//! ## Layers
//!
//! - [`metrics`]: pure scoring functions (loop area, on/off ratio, decay fit)
//! - [`driver`]: cancellable hold / sweep / pulse / retention loops over the
//!   three-method [`driver::Instrument`] contract
//! - [`thresholds`]: the immutable run configuration and its JSON file
//! - [`runner`]: the adaptive state machine producing a
//!   [`runner::DeviceOutcome`] and an audit trail
//! - [`sim`]: a behavioural device model for dry runs and tests
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use memristor_pipeline::driver::{ManualClock, MeasurementDriver};
//! use memristor_pipeline::runner::TestRunner;
//! use memristor_pipeline::sim::{DeviceParams, SimulatedMemristor};
//! use memristor_pipeline::thresholds::Thresholds;
//!
//! let clock = ManualClock::new();
//! let device = SimulatedMemristor::with_clock(DeviceParams::default(), clock.clone());
//! let driver = MeasurementDriver::with_clock(device, clock);
//! let mut runner = TestRunner::new(driver, Arc::new(Thresholds::default()));
//!
//! let (outcome, artifacts) = runner.run_device("D1")?;
//! assert_eq!(outcome.device_id(), "D1");
//! assert!(!artifacts.log.is_empty());
//! # Ok::<(), memristor_pipeline::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod driver;
pub mod error;
pub mod metrics;
pub mod runner;
pub mod sim;
pub mod thresholds;

pub use error::{Error, Result};
pub use runner::{DeviceOutcome, RunArtifacts, TestRunner};
pub use thresholds::{load_thresholds, save_thresholds, Profile, Thresholds};
