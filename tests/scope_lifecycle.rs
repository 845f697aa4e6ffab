//! End-to-end lifecycle tests for the scope controller.
//!
//! These run the real capture worker thread against the scriptable mock
//! device and the counting mock encoder. The mock's frame budget gates
//! acquisition so tests can pace the loop deterministically: grant N frames,
//! wait for the observable side effect, then grant more or shut down.

use miniscope_daq::device::mock::{MockDeviceHandle, MockDeviceLink};
use miniscope_daq::device::ControlChannel;
use miniscope_daq::encoder::EncoderStats;
use miniscope_daq::ScopeController;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scope_with_mocks() -> (ScopeController, MockDeviceHandle, Arc<EncoderStats>) {
    init_tracing();
    let stats = EncoderStats::new();
    let link = MockDeviceLink::new();
    let handle = link.handle();
    let scope = ScopeController::new(Box::new(link), EncoderStats::factory(&stats));
    (scope, handle, stats)
}

/// Poll `predicate` until it holds or the 5 second deadline passes.
fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Sequence number the mock stamped into a display frame.
fn frame_sequence(frame: &miniscope_daq::Frame) -> u16 {
    let low = frame.get(0, 0, 0).unwrap_or(0);
    let high = frame.get(1, 0, 0).unwrap_or(0);
    u16::from(low) | (u16::from(high) << 8)
}

#[test]
fn test_setting_clamps_reach_the_device() {
    let (mut scope, handle, _stats) = scope_with_mocks();
    assert!(scope.connect(0));
    handle.take_control_writes();

    scope.set_exposure(0);
    scope.set_exposure(255);
    scope.set_gain(120);
    scope.set_excitation(100);
    scope.set_excitation(0);

    assert_eq!(scope.exposure(), 100);
    assert_eq!(scope.gain(), 100);
    assert_eq!(scope.excitation(), 0);

    let writes = handle.take_control_writes();
    assert_eq!(writes[0], (ControlChannel::Exposure, 0.01));
    assert_eq!(writes[1], (ControlChannel::Exposure, 1.0));
    assert_eq!(writes[2], (ControlChannel::Gain, 1.0));
    // LED full power arrives at half of the channel scale, zero as zero.
    assert_eq!(writes[3], (ControlChannel::LedPower, 0.5));
    assert_eq!(writes[4], (ControlChannel::LedPower, 0.0));
}

#[test]
fn test_ring_overwrites_oldest_frame() {
    let (mut scope, handle, _stats) = scope_with_mocks();
    handle.allow_frames(0); // gate acquisition before the worker starts
    assert!(scope.connect(0));
    assert!(scope.run());

    // One more frame than the ring holds; frame 1 must be overwritten.
    handle.allow_frames(65);
    wait_until("all 65 frames served", || {
        handle.snapshot().frames_served == 65
    });
    // Unblock the gated grab so the worker can observe the stop request.
    handle.fail_grab(true);
    wait_until("worker exit", || !scope.running());
    scope.stop();

    let mut sequences = Vec::new();
    while let Some(frame) = scope.current_frame() {
        sequences.push(frame_sequence(&frame));
    }
    assert_eq!(sequences.len(), 64);
    assert_eq!(sequences.first(), Some(&2));
    assert_eq!(sequences.last(), Some(&65));
    // Strictly ordered, oldest first.
    assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
}

#[test]
fn test_drop_budget_exhaustion_fails_the_controller() {
    let (mut scope, handle, _stats) = scope_with_mocks();
    assert!(scope.connect(0));
    handle.fail_all_retrieves(true);
    assert!(scope.run());

    wait_until("failure after exhausting the drop budget", || {
        scope.failed()
    });
    wait_until("worker exit", || !scope.running());
    scope.stop();

    assert!(scope.dropped_frames() > 80);
    let drained = scope.drain_messages();
    assert!(drained.iter().any(|m| m == "Dropped frame."));
    assert_eq!(
        drained.last().map(String::as_str),
        Some("Too many dropped frames. Giving up.")
    );
}

#[test]
fn test_failed_controller_recovers_on_rerun() {
    let (mut scope, handle, _stats) = scope_with_mocks();
    assert!(scope.connect(0));
    handle.fail_all_retrieves(true);
    assert!(scope.run());
    wait_until("failure", || scope.failed());
    scope.stop();

    // Clear the fault; run() reconnects once and resumes.
    handle.fail_all_retrieves(false);
    assert!(scope.run());
    assert!(!scope.failed());
    wait_until("frames after recovery", || scope.current_frame().is_some());
    scope.stop();
}

#[test]
fn test_stop_is_idempotent_and_finalizes_once() {
    let (mut scope, _handle, stats) = scope_with_mocks();
    assert!(scope.connect(0));
    assert!(scope.start_recording("session.mkv"));
    wait_until("frames encoded", || {
        stats.encode_calls.load(Ordering::SeqCst) >= 3
    });

    scope.stop();
    scope.stop();
    assert!(!scope.running());
    assert!(!scope.recording());

    assert_eq!(stats.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.finalize_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_external_trigger_drives_recording() {
    let (mut scope, handle, stats) = scope_with_mocks();
    assert!(scope.connect(0));
    scope.set_video_filename("triggered.mkv");
    scope.set_external_record_trigger(true);
    assert!(scope.run());

    handle.set_status_bits(0x01);
    wait_until("trigger arms recording", || scope.recording());
    wait_until("triggered frames encoded", || {
        stats.encode_calls.load(Ordering::SeqCst) >= 2
    });
    assert!(scope.recording_started_at().is_some());

    handle.set_status_bits(0);
    wait_until("trigger disarms recording", || !scope.recording());
    wait_until("triggered recording finalized", || {
        stats.finalize_calls.load(Ordering::SeqCst) == 1
    });
    scope.stop();
}

#[test]
fn test_end_to_end_recording_run() {
    let (mut scope, handle, stats) = scope_with_mocks();
    handle.allow_frames(0);
    assert!(scope.connect(0));
    scope.set_target_fps(20);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recording.mkv");
    let path = path.to_string_lossy().into_owned();
    assert!(scope.start_recording(&path));
    assert!(scope.running());
    assert!(scope.recording());

    // Exactly ten frames while recording is armed.
    handle.allow_frames(10);
    wait_until("ten frames encoded", || {
        stats.encode_calls.load(Ordering::SeqCst) == 10
    });
    scope.stop_recording();

    // The session deactivates on the next cycle; grant a few more frames.
    handle.allow_frames(5);
    wait_until("recording finalized", || {
        stats.finalize_calls.load(Ordering::SeqCst) == 1
    });

    handle.release_gate();
    wait_until("acquisition rate measured", || scope.current_fps() > 0);
    scope.stop();

    assert_eq!(stats.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.encode_calls.load(Ordering::SeqCst), 10);
    assert_eq!(stats.finalize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*stats.last_path.lock().unwrap(), Some(path));
    assert_eq!(
        *stats.last_geometry.lock().unwrap(),
        Some((64, 48, 20, false))
    );

    // The live-view ring kept the most recent display frames in order.
    let mut sequences = Vec::new();
    while let Some(frame) = scope.current_frame() {
        sequences.push(frame_sequence(&frame));
    }
    assert!(!sequences.is_empty());
    assert!(sequences.len() <= 64);
    assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));

    // Messages arrive in lifecycle order.
    let drained = scope.drain_messages();
    let positions: Vec<usize> = [
        "Recording enabled.",
        "Initialized video recording.",
        "Recording finalized.",
    ]
    .iter()
    .map(|needle| {
        drained
            .iter()
            .position(|m| m == needle)
            .unwrap_or_else(|| panic!("missing message: {needle}"))
    })
    .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_drop_teardown_turns_led_off() {
    let (scope, handle, _stats) = {
        let (mut scope, handle, stats) = scope_with_mocks();
        assert!(scope.connect(0));
        scope.set_excitation(40);
        handle.take_control_writes();
        (scope, handle, stats)
    };
    drop(scope);

    let writes = handle.take_control_writes();
    assert!(writes.contains(&(ControlChannel::LedPower, 0.0)));
    assert!(!handle.snapshot().open);
}
