//! Measurement driver tests against a scripted instrument on a virtual clock

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use common::{Call, ScriptedInstrument};
use memristor_pipeline::driver::{
    ChannelObserver, Clock, FailureStop, ManualClock, MeasurementDriver, MeasurementEvent,
    PulseSpec, SafetyLimits, SweepSpec,
};
use memristor_pipeline::Error;

fn sweep(v_min: f64, v_max: f64, step_v: f64) -> SweepSpec {
    SweepSpec {
        v_min,
        v_max,
        step_v,
        dwell_s: 0.0,
        cycles: 1,
        compliance_a: 1e-3,
    }
}

fn pulses(cycles: usize, stop: Option<FailureStop>) -> PulseSpec {
    PulseSpec {
        set_v: 1.5,
        reset_v: -1.5,
        width_s: 0.01,
        read_v: 0.1,
        cycles,
        compliance_a: 1e-3,
        stop,
    }
}

// =============================================================================
// dc_hold
// =============================================================================

#[test]
fn test_dc_hold_abort_disables_output_before_error() {
    let (instrument, log) = ScriptedInstrument::constant(1e-6);
    let probe_log = log.clone();
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new())
        .with_abort(move || probe_log.measure_count() >= 3);

    let result = driver.dc_hold(0.2, 10.0, 10.0, 1e-4);

    // Output was already off by the time the caller sees the error
    assert!(matches!(result, Err(Error::InstrumentAborted)));
    assert_eq!(log.output_count(false), 1);
    assert_eq!(log.measure_count(), 3);
    assert_eq!(log.calls().last(), Some(&Call::EnableOutput(false)));
}

#[test]
fn test_dc_hold_streams_samples() {
    let (instrument, _log) = ScriptedInstrument::constant(2e-6);
    let (tx, rx) = mpsc::channel();
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new())
        .with_observer(ChannelObserver::new(tx));

    let trace = driver.dc_hold(0.2, 0.5, 10.0, 1e-4).unwrap();

    let events: Vec<MeasurementEvent> = rx.try_iter().collect();
    assert_eq!(trace.len(), 5);
    assert_eq!(events.len(), 5);
    assert!(matches!(events[0], MeasurementEvent::Sample(s) if (s.voltage_v - 0.2).abs() < 1e-12));
    assert!((trace.mean_current() - 2e-6).abs() < 1e-18);
}

#[test]
fn test_dc_hold_rejects_zero_rate() {
    let (instrument, log) = ScriptedInstrument::constant(0.0);
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new());
    assert!(matches!(
        driver.dc_hold(0.2, 1.0, 0.0, 1e-4),
        Err(Error::InvalidInput(_))
    ));
    assert!(log.calls().is_empty());
}

#[test]
fn test_instrument_error_propagates_after_output_disable() {
    let (instrument, log) = ScriptedInstrument::constant(1e-6);
    let mut driver =
        MeasurementDriver::with_clock(instrument.failing_at(2), ManualClock::new());

    let err = driver.dc_hold(0.2, 1.0, 10.0, 1e-4).unwrap_err();

    match err {
        Error::Instrument(source) => assert!(source.to_string().contains("GPIB read timeout")),
        other => panic!("expected instrument error, got {other:?}"),
    }
    assert_eq!(log.measure_count(), 3);
    assert_eq!(log.calls().last(), Some(&Call::EnableOutput(false)));
}

#[test]
fn test_slew_limit_trips() {
    let (instrument, log) = ScriptedInstrument::new(|p| if p.index == 0 { 0.0 } else { 1.0 });
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new()).with_limits(
        SafetyLimits {
            max_current_slew_a_per_s: 1.0,
            ..SafetyLimits::default()
        },
    );

    let err = driver.dc_hold(0.2, 1.0, 10.0, 1e-4).unwrap_err();
    assert!(matches!(err, Error::SafetyLimit(_)));
    assert_eq!(log.calls().last(), Some(&Call::EnableOutput(false)));
}

// =============================================================================
// triangle_sweep
// =============================================================================

#[test]
fn test_triangle_sweep_visits_three_legs() {
    let (instrument, log) = ScriptedInstrument::constant(1e-6);
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new());

    let trace = driver.triangle_sweep(&sweep(-1.0, 1.0, 0.5)).unwrap();

    let expected = [
        0.0, 0.5, 1.0, // 0 → v_max
        1.0, 0.5, 0.0, -0.5, -1.0, // v_max → v_min
        -1.0, -0.5, 0.0, // v_min → 0
    ];
    assert_eq!(trace.voltage(), &expected);
    assert_eq!(log.live_set_points(), expected.to_vec());
    assert_eq!(log.output_count(true), 1);
    assert_eq!(log.output_count(false), 1);
}

#[test]
fn test_triangle_sweep_concatenates_cycles() {
    let (instrument, _log) = ScriptedInstrument::constant(1e-6);
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new());

    let spec = SweepSpec {
        cycles: 3,
        dwell_s: 0.01,
        ..sweep(-1.0, 1.0, 1.0)
    };
    let trace = driver.triangle_sweep(&spec).unwrap();

    assert_eq!(trace.len(), 3 * 7);
    assert!(trace.timestamps().windows(2).all(|w| w[1] >= w[0]));
    assert!((trace.timestamps()[20] - 0.21).abs() < 1e-9);
}

#[test]
fn test_triangle_sweep_refuses_points_beyond_cap() {
    let (instrument, log) = ScriptedInstrument::constant(1e-6);
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new()).with_limits(
        SafetyLimits {
            max_voltage_v: 2.0,
            ..SafetyLimits::default()
        },
    );

    let err = driver.triangle_sweep(&sweep(-3.0, 1.0, 0.5)).unwrap_err();
    assert!(matches!(err, Error::SafetyLimit(_)));
    assert!(log.calls().is_empty());
}

#[test]
fn test_triangle_sweep_clamps_compliance() {
    let (instrument, log) = ScriptedInstrument::constant(1e-6);
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new()).with_limits(
        SafetyLimits {
            max_compliance_a: 1e-4,
            ..SafetyLimits::default()
        },
    );

    driver
        .triangle_sweep(&SweepSpec {
            compliance_a: 1e-2,
            ..sweep(-0.5, 0.5, 0.5)
        })
        .unwrap();

    assert!(log
        .calls()
        .iter()
        .all(|c| !matches!(c, Call::SetVoltage(_, icc) if *icc > 1e-4)));
}

#[test]
fn test_triangle_sweep_abort_mid_sweep() {
    let (instrument, log) = ScriptedInstrument::constant(1e-6);
    let probe_log = log.clone();
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new())
        .with_abort(move || probe_log.measure_count() >= 4);

    let err = driver.triangle_sweep(&sweep(-1.0, 1.0, 0.5)).unwrap_err();
    assert!(err.is_abort());
    assert_eq!(log.output_count(false), 1);
    assert_eq!(log.measure_count(), 4);
}

// =============================================================================
// endurance_pulses
// =============================================================================

#[test]
fn test_endurance_stops_after_consecutive_failures() {
    // Same current after SET and RESET: ratio 1.0, below the floor every cycle
    let (instrument, _log) = ScriptedInstrument::constant(1e-6);
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new());

    let readings = driver
        .endurance_pulses(&pulses(
            20,
            Some(FailureStop {
                ratio_below: 2.0,
                consecutive: 3,
            }),
        ))
        .unwrap();

    assert_eq!(readings.len(), 3);
    assert!(readings.iter().all(|r| (r.ratio - 1.0).abs() < 1e-9));
}

#[test]
fn test_endurance_zero_consecutive_runs_every_cycle() {
    let (instrument, _log) = ScriptedInstrument::constant(1e-6);
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new());

    let readings = driver
        .endurance_pulses(&pulses(
            8,
            Some(FailureStop {
                ratio_below: 2.0,
                consecutive: 0,
            }),
        ))
        .unwrap();

    // Every cycle fails the floor, but a zero count never stops the train
    assert_eq!(readings.len(), 8);
}

#[test]
fn test_endurance_passing_cycle_resets_failure_count() {
    // Measurements come in (on, off) pairs; cycle 2 is the only good one
    let (instrument, _log) = ScriptedInstrument::new(|p| {
        let cycle = p.index / 2;
        let is_on = p.index % 2 == 0;
        if is_on && cycle == 2 {
            1e-5
        } else {
            1e-6
        }
    });
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new());

    let readings = driver
        .endurance_pulses(&pulses(
            10,
            Some(FailureStop {
                ratio_below: 2.0,
                consecutive: 3,
            }),
        ))
        .unwrap();

    // fail, fail, pass, fail, fail, fail -> stop
    assert_eq!(readings.len(), 6);
    assert!(readings[2].ratio > 2.0);
}

#[test]
fn test_endurance_pulse_sequence_and_callbacks() {
    let (instrument, log) = ScriptedInstrument::constant(1e-6);
    let cycles = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&cycles);
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new())
        .with_observer(move |event: &MeasurementEvent| {
            if let MeasurementEvent::Cycle(c) = event {
                sink.borrow_mut().push(c.index);
            }
        });

    let readings = driver.endurance_pulses(&pulses(2, None)).unwrap();

    assert_eq!(readings.len(), 2);
    assert_eq!(*cycles.borrow(), vec![0, 1]);
    assert_eq!(
        log.live_set_points(),
        vec![1.5, 0.1, -1.5, 0.1, 1.5, 0.1, -1.5, 0.1]
    );
    assert_eq!(log.measure_count(), 4);
    // Two pulse widths per cycle
    assert_eq!(driver.clock().now(), Duration::from_millis(40));
}

// =============================================================================
// retention_reads
// =============================================================================

#[test]
fn test_retention_reads_follow_requested_order() {
    let clock = ManualClock::new();
    let model_clock = clock.clone();
    // Current encodes the read time so the ordering is visible
    let (instrument, _log) =
        ScriptedInstrument::new(move |_| model_clock.now().as_secs_f64() * 1e-6);
    let reads = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reads);
    let mut driver = MeasurementDriver::with_clock(instrument, clock)
        .with_observer(move |event: &MeasurementEvent| {
            if let MeasurementEvent::Read { index, elapsed_s, .. } = event {
                sink.borrow_mut().push((*index, *elapsed_s));
            }
        });

    let times = [10.0, 1.0, 5.0];
    let currents = driver.retention_reads(0.1, &times, 1e-4).unwrap();

    // Visited in ascending time...
    let visited: Vec<usize> = reads.borrow().iter().map(|(i, _)| *i).collect();
    assert_eq!(visited, vec![1, 2, 0]);
    // ...but returned in the caller's order, each after its deadline
    for (t, i) in times.iter().zip(&currents) {
        assert!(*i >= t * 1e-6 - 1e-15);
        assert!(*i < (t + 0.06) * 1e-6);
    }
}

#[test]
fn test_retention_reads_abort_while_waiting() {
    let clock = ManualClock::new();
    let abort_clock = clock.clone();
    let (instrument, log) = ScriptedInstrument::constant(1e-6);
    let mut driver = MeasurementDriver::with_clock(instrument, clock)
        .with_abort(move || abort_clock.now() >= Duration::from_secs(3));

    let err = driver.retention_reads(0.1, &[1.0, 100.0], 1e-4).unwrap_err();

    assert!(err.is_abort());
    assert_eq!(log.measure_count(), 1);
    assert_eq!(log.calls().last(), Some(&Call::EnableOutput(false)));
}

#[test]
fn test_retention_reads_rejects_negative_time() {
    let (instrument, log) = ScriptedInstrument::constant(1e-6);
    let mut driver = MeasurementDriver::with_clock(instrument, ManualClock::new());
    assert!(matches!(
        driver.retention_reads(0.1, &[1.0, -2.0], 1e-4),
        Err(Error::InvalidInput(_))
    ));
    assert!(log.calls().is_empty());
}
