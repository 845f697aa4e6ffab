//! Background capture loop.
//!
//! One worker thread owns this loop while the controller's running flag is
//! set. Each cycle polls the external trigger, acquires a frame, updates the
//! recovery and FPS state, shapes the display frame, drives the recording
//! session and distributes the results. The loop never lets an error value
//! escape to the owning thread: terminal conditions funnel through the shared
//! failure path and the worker exits, finalizing any open recording first.
//!
//! A transient retrieve failure is a *drop*: the counter is bumped, a
//! placeholder lands in the live-view ring and the device is closed and
//! reopened before the next attempt. Exceeding the drop budget gives up.

use crate::data::shaping::{dropped_frame_placeholder, shape_frame};
use crate::device::command::{
    exposure_control_value, gain_control_value, led_control_value, TRIG_RECORD_EXT,
};
use crate::device::{ControlChannel, DeviceLink};
use crate::encoder::EncoderFactory;
use crate::error::ScopeError;
use crate::recording::RecordingSession;
use crate::scope::SharedState;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Consecutive drops tolerated before the loop gives up.
const MAX_DROPPED_FRAMES: u64 = 80;

/// Whether the loop proceeds to another cycle or exits.
#[derive(Debug, PartialEq, Eq)]
enum CycleOutcome {
    Continue,
    Exit,
}

/// The capture worker: loop state owned by the background thread.
pub(crate) struct CaptureWorker {
    shared: Arc<SharedState>,
    device: Arc<Mutex<Box<dyn DeviceLink>>>,
    session: RecordingSession,
    last_capture: Option<Instant>,
}

impl CaptureWorker {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        device: Arc<Mutex<Box<dyn DeviceLink>>>,
        encoder_factory: EncoderFactory,
    ) -> Self {
        Self {
            shared,
            device,
            session: RecordingSession::new(encoder_factory),
            last_capture: None,
        }
    }

    /// Thread body: cycle until stopped or failed, then finalize.
    pub(crate) fn run(mut self) {
        tracing::debug!("capture worker started");
        self.shared.dropped_frames.store(0, Ordering::SeqCst);
        self.shared.current_fps.store(0, Ordering::SeqCst);

        while self.shared.running.load(Ordering::SeqCst) {
            if self.cycle() == CycleOutcome::Exit {
                break;
            }
        }

        // Finalize whatever recording is still open, on every exit path.
        self.session.finalize(&self.shared.messages);
        tracing::debug!("capture worker exited");
    }

    fn cycle(&mut self) -> CycleOutcome {
        self.poll_external_trigger();

        // Two-phase acquisition. A failed grab means the transport is gone.
        let grabbed = {
            let mut device = self.lock_device();
            device.grab()
        };
        if let Err(e) = grabbed {
            tracing::error!("frame grab failed: {e}");
            self.shared.fail("Failed to grab frame.");
            return CycleOutcome::Exit;
        }

        let retrieved = {
            let mut device = self.lock_device();
            device.retrieve()
        };
        let frame = match retrieved {
            Ok(frame) => frame,
            Err(e) => return self.handle_dropped_frame(&e),
        };

        // FPS from the reciprocal inter-frame delta of successful captures.
        let now = Instant::now();
        if let Some(previous) = self.last_capture {
            let delta = now.duration_since(previous).as_secs_f64();
            if delta > 0.0 {
                let fps = (1.0 / delta).round() as u32;
                self.shared.current_fps.store(fps, Ordering::SeqCst);
            }
        }
        self.last_capture = Some(now);

        // A drop since the last successful frame may mean the device lost
        // its settings; push them all again and reset the counter.
        if self.shared.dropped_frames.load(Ordering::SeqCst) > 0 {
            self.shared.messages.emit("Sending settings again.");
            self.resend_settings();
            self.shared.dropped_frames.store(0, Ordering::SeqCst);
        }

        let display_settings = self
            .shared
            .display
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let shaped = shape_frame(frame, &display_settings);
        if !display_settings.use_color {
            self.shared
                .min_fluor
                .store(shaped.min_intensity, Ordering::SeqCst);
            self.shared
                .max_fluor
                .store(shaped.max_intensity, Ordering::SeqCst);
        }

        // Recording session transitions for this cycle.
        let want_recording = self.shared.running.load(Ordering::SeqCst)
            && self.shared.record_intent.load(Ordering::SeqCst);
        let config = self
            .shared
            .recording_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let target_fps = self
            .shared
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .target_fps();
        if let Err(e) = self.session.drive(
            want_recording,
            &shaped.record,
            &config,
            target_fps,
            &self.shared.messages,
        ) {
            self.shared.fail(e.to_string());
            return CycleOutcome::Exit;
        }

        // Distribute: display frame to the ring, record frame to the encoder.
        {
            let mut ring = self
                .shared
                .ring
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            ring.push(shaped.display);
        }
        if self.session.is_active() {
            self.session.record_frame(shaped.record, &self.shared.messages);
        }

        CycleOutcome::Continue
    }

    /// Arm or disarm the recording intent from the device status bitmask.
    fn poll_external_trigger(&mut self) {
        if !self.shared.check_trigger.load(Ordering::SeqCst) {
            return;
        }
        let bits = {
            let mut device = self.lock_device();
            device.read_control(ControlChannel::Command)
        };
        match bits {
            Ok(value) => {
                let bits = value as i64;
                if bits & TRIG_RECORD_EXT == TRIG_RECORD_EXT {
                    if !self.shared.record_intent.load(Ordering::SeqCst) {
                        let mut start = self
                            .shared
                            .record_start
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        *start = Some(Utc::now());
                        self.shared.record_intent.store(true, Ordering::SeqCst);
                    }
                } else {
                    self.shared.record_intent.store(false, Ordering::SeqCst);
                }
            }
            Err(e) => tracing::warn!("external trigger poll failed: {e}"),
        }
    }

    /// A retrieve failed: record the drop, show the placeholder, reconnect,
    /// and give up once the budget is exhausted.
    fn handle_dropped_frame(&mut self, cause: &anyhow::Error) -> CycleOutcome {
        tracing::warn!("{}", ScopeError::Capture(cause.to_string()));

        // No frame this cycle, so no recording this cycle either.
        self.shared.record_intent.store(false, Ordering::SeqCst);
        let dropped = self.shared.dropped_frames.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.messages.emit("Dropped frame.");

        {
            let mut ring = self
                .shared
                .ring
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            ring.push(dropped_frame_placeholder());
        }

        self.shared.messages.emit("Reconnecting scope...");
        let index = self.shared.device_index.load(Ordering::SeqCst);
        let reopened = {
            let mut device = self.lock_device();
            device.close();
            device.open(index)
        };
        match reopened {
            Ok(()) => self.shared.messages.emit("Scope reconnected."),
            Err(e) => tracing::warn!("reconnect failed: {e}"),
        }

        if dropped > MAX_DROPPED_FRAMES {
            self.shared
                .fail(ScopeError::TooManyDroppedFrames.to_string());
            return CycleOutcome::Exit;
        }
        CycleOutcome::Continue
    }

    /// Re-push exposure, gain and LED power from the current settings.
    fn resend_settings(&mut self) {
        let settings = self
            .shared
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut device = self.lock_device();
        let writes = [
            (ControlChannel::Exposure, exposure_control_value(settings.exposure())),
            (ControlChannel::Gain, gain_control_value(settings.gain())),
            (ControlChannel::LedPower, led_control_value(settings.excitation())),
        ];
        for (channel, value) in writes {
            if let Err(e) = device.write_control(channel, value) {
                tracing::warn!("settings resync write failed: {e}");
            }
        }
    }

    fn lock_device(&self) -> std::sync::MutexGuard<'_, Box<dyn DeviceLink>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockDeviceHandle, MockDeviceLink};
    use crate::encoder::EncoderStats;

    fn worker_with_mock(
        stats: &Arc<EncoderStats>,
    ) -> (CaptureWorker, Arc<SharedState>, MockDeviceHandle) {
        let shared = Arc::new(SharedState::new());
        let mut link = MockDeviceLink::new();
        let handle = link.handle();
        link.open(0).expect("mock open");
        shared.running.store(true, Ordering::SeqCst);

        let device: Arc<Mutex<Box<dyn DeviceLink>>> = Arc::new(Mutex::new(Box::new(link)));
        let worker = CaptureWorker::new(shared.clone(), device, EncoderStats::factory(stats));
        (worker, shared, handle)
    }

    #[test]
    fn test_successful_cycle_pushes_display_frame() {
        let stats = EncoderStats::new();
        let (mut worker, shared, _handle) = worker_with_mock(&stats);

        assert_eq!(worker.cycle(), CycleOutcome::Continue);
        let frame = shared.ring.lock().unwrap().pop().expect("display frame");
        assert_eq!(frame.channels(), 1);
        assert!(!shared.failed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_grab_failure_is_fatal() {
        let stats = EncoderStats::new();
        let (mut worker, shared, handle) = worker_with_mock(&stats);
        handle.fail_grab(true);

        assert_eq!(worker.cycle(), CycleOutcome::Exit);
        assert!(shared.failed.load(Ordering::SeqCst));
        assert!(!shared.running.load(Ordering::SeqCst));
        let drained = shared.messages.drain();
        assert_eq!(drained.last().map(String::as_str), Some("Failed to grab frame."));
    }

    #[test]
    fn test_drop_pushes_placeholder_and_reconnects() {
        let stats = EncoderStats::new();
        let (mut worker, shared, handle) = worker_with_mock(&stats);
        handle.fail_next_retrieves(1);

        assert_eq!(worker.cycle(), CycleOutcome::Continue);
        assert_eq!(shared.dropped_frames.load(Ordering::SeqCst), 1);

        // Placeholder frame is color and full red.
        let placeholder = shared.ring.lock().unwrap().pop().expect("placeholder");
        assert!(placeholder.is_color());
        assert_eq!(placeholder.get(0, 0, 2), Some(255));

        // The device was closed and reopened.
        assert_eq!(handle.snapshot().open_count, 2);
    }

    #[test]
    fn test_settings_resent_after_drop() {
        let stats = EncoderStats::new();
        let (mut worker, shared, handle) = worker_with_mock(&stats);
        handle.fail_next_retrieves(1);

        assert_eq!(worker.cycle(), CycleOutcome::Continue);
        handle.take_control_writes();

        // Next successful cycle re-pushes every setting and clears the count.
        assert_eq!(worker.cycle(), CycleOutcome::Continue);
        let channels: Vec<ControlChannel> = handle
            .take_control_writes()
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        assert_eq!(
            channels,
            vec![
                ControlChannel::Exposure,
                ControlChannel::Gain,
                ControlChannel::LedPower
            ]
        );
        assert_eq!(shared.dropped_frames.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_budget_exhaustion() {
        let stats = EncoderStats::new();
        let (mut worker, shared, handle) = worker_with_mock(&stats);
        handle.fail_all_retrieves(true);

        // The budget tolerates exactly 80 consecutive drops.
        for i in 1..=80 {
            assert_eq!(worker.cycle(), CycleOutcome::Continue, "drop {i}");
            assert!(!shared.failed.load(Ordering::SeqCst), "drop {i}");
        }

        // The 81st gives up.
        assert_eq!(worker.cycle(), CycleOutcome::Exit);
        assert!(shared.failed.load(Ordering::SeqCst));
        assert!(!shared.running.load(Ordering::SeqCst));
        // The operator message is the error type's own rendering.
        assert_eq!(
            shared.messages.drain().last(),
            Some(&ScopeError::TooManyDroppedFrames.to_string())
        );
    }

    #[test]
    fn test_worker_start_resets_counters() {
        let stats = EncoderStats::new();
        let (worker, shared, _handle) = worker_with_mock(&stats);
        shared.dropped_frames.store(12, Ordering::SeqCst);
        shared.current_fps.store(19, Ordering::SeqCst);
        shared.running.store(false, Ordering::SeqCst);

        // With running cleared the loop body never executes, so the state
        // after run() is exactly the fresh-start state.
        worker.run();
        assert_eq!(shared.dropped_frames.load(Ordering::SeqCst), 0);
        assert_eq!(shared.current_fps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_external_trigger_arms_and_disarms() {
        let stats = EncoderStats::new();
        let (mut worker, shared, handle) = worker_with_mock(&stats);
        shared.check_trigger.store(true, Ordering::SeqCst);

        handle.set_status_bits(TRIG_RECORD_EXT);
        assert_eq!(worker.cycle(), CycleOutcome::Continue);
        assert!(shared.record_intent.load(Ordering::SeqCst));
        assert!(shared.record_start.lock().unwrap().is_some());

        handle.set_status_bits(0);
        assert_eq!(worker.cycle(), CycleOutcome::Continue);
        assert!(!shared.record_intent.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recording_cycle_counts() {
        let stats = EncoderStats::new();
        let (mut worker, shared, _handle) = worker_with_mock(&stats);
        {
            let mut config = shared.recording_config.lock().unwrap();
            config.filename = "out.mkv".into();
        }
        shared.record_intent.store(true, Ordering::SeqCst);

        for _ in 0..3 {
            assert_eq!(worker.cycle(), CycleOutcome::Continue);
        }
        shared.record_intent.store(false, Ordering::SeqCst);
        assert_eq!(worker.cycle(), CycleOutcome::Continue);

        assert_eq!(stats.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.encode_calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.finalize_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encoder_init_failure_stops_loop() {
        let stats = EncoderStats::new();
        stats.fail_initialize.store(true, Ordering::SeqCst);
        let (mut worker, shared, _handle) = worker_with_mock(&stats);
        shared.record_intent.store(true, Ordering::SeqCst);

        assert_eq!(worker.cycle(), CycleOutcome::Exit);
        assert!(shared.failed.load(Ordering::SeqCst));
        let drained = shared.messages.drain();
        assert!(drained
            .iter()
            .any(|m| m.starts_with("Unable to initialize recording")));
    }
}
