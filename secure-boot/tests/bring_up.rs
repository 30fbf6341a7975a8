//! Ordered platform bring-up.

mod common;

use common::{EventLog, FakePlatform};
use image::{FlashMode, ParseFlashHeaderError};
use secure_boot::sequencer::{BringUpError, ResetCause, Sequencer, Step, StepFailure, TraceRecord};

const BAUD_RATE: u32 = 115_200;
const WATCHDOG_TIMEOUT_MS: u32 = 9_000;

const ALL_CALLS: [&str; 14] = [
    "configure_reset_sources",
    "set_watchdog_auto_feed",
    "init_memory_protection",
    "zero_memory",
    "reset_cache",
    "configure_clocks",
    "init_console",
    "start_flash",
    "read_flash_header",
    "unlock_flash",
    "configure_flash",
    "enable_write_protection",
    "reset_cause",
    "enable_trace_recording",
];

fn failing_at(name: &'static str, failure: StepFailure) -> FakePlatform {
    FakePlatform::new(EventLog::default()).failing_at(name, failure)
}

#[test]
fn runs_every_step_in_order() {
    let mut platform = FakePlatform::new(EventLog::default());
    let mut sequencer = Sequencer::new(BAUD_RATE, WATCHDOG_TIMEOUT_MS);

    let report = sequencer.run(&mut platform).unwrap();

    let calls = platform.calls();
    assert_eq!(calls[..ALL_CALLS.len()], ALL_CALLS);
    assert_eq!(
        calls[ALL_CALLS.len()..],
        ["configure_watchdog", "set_watchdog_auto_feed"]
    );

    assert_eq!(platform.auto_feed, [true, false]);
    assert_eq!(platform.baud_rate, Some(BAUD_RATE));
    assert_eq!(platform.watchdog_timeout_ms, Some(WATCHDOG_TIMEOUT_MS));

    assert_eq!(report.reset_cause, ResetCause::PowerOn);
    assert_eq!(report.flash_geometry.size, 4 * 0x10_0000);
    assert_eq!(report.flash_geometry.mode, FlashMode::DIO);
    assert_eq!(report.flash_geometry.speed, 0xF);

    let state = sequencer.state();
    assert_eq!(state.step(), Some(Step::Watchdog));
    assert_eq!(state.last_error(), None);
    assert_eq!(state.reset_cause(), Some(ResetCause::PowerOn));
}

#[test]
fn stops_at_first_failure() {
    let mut platform = failing_at("zero_memory", StepFailure::Timeout);
    let mut sequencer = Sequencer::new(BAUD_RATE, WATCHDOG_TIMEOUT_MS);

    assert_eq!(
        sequencer.run(&mut platform),
        Err(BringUpError::StepFailed {
            step: Step::ZeroMemory,
            failure: StepFailure::Timeout,
        })
    );

    assert_eq!(platform.calls(), ALL_CALLS[..4]);
    let state = sequencer.state();
    assert_eq!(state.step(), Some(Step::ZeroMemory));
    assert_eq!(state.last_error(), Some(StepFailure::Timeout));
    assert_eq!(state.reset_cause(), None);
}

#[test]
fn flash_configuration_failure_names_its_step() {
    let failure = StepFailure::Hardware { status: 0x80 };
    let mut platform = failing_at("configure_flash", failure);
    let mut sequencer = Sequencer::new(BAUD_RATE, WATCHDOG_TIMEOUT_MS);

    assert_eq!(
        sequencer.run(&mut platform),
        Err(BringUpError::StepFailed {
            step: Step::FlashConfig,
            failure,
        })
    );
    assert_eq!(platform.calls().last(), Some(&"configure_flash"));
    assert!(!platform.calls().contains(&"enable_write_protection"));
}

#[test]
fn bad_flash_header_fails_its_step() {
    let mut platform = FakePlatform::new(EventLog::default());
    platform.flash_header[0] = 0x00;
    let mut sequencer = Sequencer::new(BAUD_RATE, WATCHDOG_TIMEOUT_MS);

    assert_eq!(
        sequencer.run(&mut platform),
        Err(BringUpError::StepFailed {
            step: Step::ReadFlashHeader,
            failure: StepFailure::InvalidFlashHeader(ParseFlashHeaderError::BadMagic {
                magic: 0x00
            }),
        })
    );
    assert_eq!(platform.calls().last(), Some(&"read_flash_header"));
}

#[test]
fn final_watchdog_failure_keeps_auto_feed() {
    let mut platform = failing_at("configure_watchdog", StepFailure::NotReady);
    let mut sequencer = Sequencer::new(BAUD_RATE, WATCHDOG_TIMEOUT_MS);

    assert_eq!(
        sequencer.run(&mut platform),
        Err(BringUpError::StepFailed {
            step: Step::Watchdog,
            failure: StepFailure::NotReady,
        })
    );
    assert_eq!(platform.auto_feed, [true]);
}

#[test]
fn never_runs_twice() {
    let mut platform = FakePlatform::new(EventLog::default());
    let mut sequencer = Sequencer::new(BAUD_RATE, WATCHDOG_TIMEOUT_MS);
    sequencer.run(&mut platform).unwrap();
    let calls = platform.calls().len();

    assert_eq!(
        sequencer.run(&mut platform),
        Err(BringUpError::NotRestartable)
    );
    assert_eq!(platform.calls().len(), calls);

    let mut failing = failing_at("configure_clocks", StepFailure::NotReady);
    let mut sequencer = Sequencer::new(BAUD_RATE, WATCHDOG_TIMEOUT_MS);
    sequencer.run(&mut failing).unwrap_err();
    let calls = failing.calls().len();

    assert_eq!(
        sequencer.run(&mut failing),
        Err(BringUpError::NotRestartable)
    );
    assert_eq!(failing.calls().len(), calls);
}

#[test]
fn watchdog_reset_reads_trace() {
    let mut platform = FakePlatform::new(EventLog::default());
    platform.reset_cause = ResetCause::Watchdog;
    platform.trace = Some(TraceRecord {
        program_counter: 0x1001_0040,
        link_register: 0x1001_0001,
        stack_pointer: 0x3801_FFF0,
    });
    let mut sequencer = Sequencer::new(BAUD_RATE, WATCHDOG_TIMEOUT_MS);

    let report = sequencer.run(&mut platform).unwrap();

    assert_eq!(report.reset_cause, ResetCause::Watchdog);
    let calls = platform.calls();
    let reset_cause = calls.iter().position(|call| *call == "reset_cause").unwrap();
    assert_eq!(
        calls[reset_cause..reset_cause + 3],
        ["reset_cause", "trace_record", "enable_trace_recording"]
    );
}
