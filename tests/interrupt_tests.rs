//! Operator abort unwinds through the scoped guard

mod utils;

use cost_calibrator::config::CalibrationConfig;
use cost_calibrator::controller::{Lifecycle, ProcessState};
use cost_calibrator::error::CalibrationError;
use cost_calibrator::interrupt;
use cost_calibrator::protocol::run_calibration;
use serial_test::serial;
use utils::{EngineScript, Event, FakeLifecycle, NoopPopulator};

#[test]
#[serial(interrupt)]
fn test_interrupt_stops_engine_before_propagating() {
    let mut config = CalibrationConfig::default();
    config.protocol.seed = Some(1);
    let mut lc = FakeLifecycle::new(EngineScript::default());

    interrupt::request();
    let result = run_calibration(&mut lc, &NoopPopulator, &config);
    interrupt::reset();

    assert!(matches!(result, Err(CalibrationError::Interrupted)));
    assert_eq!(Lifecycle::state(&lc), ProcessState::Stopped);
    assert_eq!(lc.events().last(), Some(&Event::Stop { was_running: true }));
    assert_eq!(lc.count(Event::Start), lc.stops());
}

#[test]
#[serial(interrupt)]
fn test_run_completes_after_reset() {
    let mut config = CalibrationConfig::default();
    config.protocol.seed = Some(1);
    config.protocol.seq_runs = 3;
    let mut lc = FakeLifecycle::new(EngineScript::default());

    interrupt::request();
    interrupt::reset();
    assert!(run_calibration(&mut lc, &NoopPopulator, &config).is_ok());
}
