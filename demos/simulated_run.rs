//! Simulated Characterization Run
//!
//! Walks a behavioural memristor model through the whole pipeline on a
//! virtual clock, so the run finishes instantly regardless of the configured
//! retention times.
//!
//! - Probe the pristine device, form it, re-probe
//! - Search the hysteresis profiles for the widest loop
//! - Cycle endurance pulses and fit the retention decay
//!
//! Run with: cargo run --example simulated_run [-- path/to/tests_settings.json]
//!
//! Set `RUST_LOG=memristor_pipeline=debug` to see every cycle and read.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Context;
use memristor_pipeline::driver::{Clock, ManualClock, MeasurementDriver, MeasurementEvent};
use memristor_pipeline::sim::{DeviceParams, SimulatedMemristor};
use memristor_pipeline::thresholds::SETTINGS_FILE_NAME;
use memristor_pipeline::{load_thresholds, TestRunner};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = std::env::args()
        .nth(1)
        .unwrap_or_else(|| SETTINGS_FILE_NAME.to_string());
    let thresholds = Arc::new(load_thresholds(&settings));

    println!("=== Memristor Pipeline: Simulated Run ===\n");
    println!("Settings: {settings}");
    println!(
        "  probe {} V, forming ladder {:?} V, {} hysteresis profiles (budget {})",
        thresholds.probe_voltage_v,
        thresholds.forming_ladder(),
        thresholds.hyst_profiles.len(),
        thresholds.hyst_budget
    );
    println!(
        "  safety caps: ±{} V, {:e} A compliance\n",
        thresholds.max_voltage_v, thresholds.max_compliance_a
    );

    let clock = ManualClock::new();
    let device = SimulatedMemristor::with_clock(DeviceParams::default(), clock.clone());

    let samples = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&samples);
    let driver = MeasurementDriver::with_clock(device, clock.clone()).with_observer(
        move |event: &MeasurementEvent| {
            if matches!(event, MeasurementEvent::Sample(_)) {
                counter.set(counter.get() + 1);
            }
        },
    );

    let mut runner = TestRunner::new(driver, thresholds);
    let (outcome, artifacts) = runner
        .run_device("SIM-001")
        .context("simulated run failed")?;

    println!("=== Audit Log ===");
    for line in artifacts.log.lines() {
        println!("  {line}");
    }

    println!("\n=== Summary ===");
    println!("  samples streamed:   {}", samples.get());
    println!("  virtual time:       {:.1} s", clock.now().as_secs_f64());
    println!("  working:            {}", outcome.is_working());
    println!("  formed:             {}", outcome.formed());
    if let Some(profile) = outcome.best_profile() {
        println!("  best profile:       {profile}");
    }
    if let Some(ratio) = outcome.endurance_ratio() {
        println!("  median on/off:      {ratio:.2}");
    }
    if let Some(alpha) = outcome.retention_alpha() {
        println!("  retention alpha:    {alpha:.3}");
    }

    println!("\n=== Outcome (JSON) ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("encoding outcome")?
    );

    Ok(())
}
