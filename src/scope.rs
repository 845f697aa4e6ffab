//! Scope controller facade.
//!
//! [`ScopeController`] owns the device link, the capture worker and the
//! recording machinery, and exposes the only thread-safe entry points to
//! embedding applications. All public calls are made from one owning thread;
//! the capture worker runs concurrently and communicates through atomics, the
//! buffer mutex and the outbound message queue.
//!
//! The controller blocks only in [`ScopeController::stop`] (and transitively
//! in `disconnect` and on drop), where it joins the worker so any open
//! recording is finalized before the call returns.

use crate::capture::CaptureWorker;
use crate::data::{Frame, FrameRing};
use crate::device::command::{
    exposure_control_value, gain_control_value, led_control_value, DeviceCommand,
};
use crate::device::{ControlChannel, DeviceLink};
use crate::encoder::EncoderFactory;
use crate::error::ScopeError;
use crate::messages::{MessageQueue, MessageSink};
use crate::settings::{DisplaySettings, RecordingConfig, ScopeSettings, VideoCodec, VideoContainer};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Messages retained for the owner between drains.
const MESSAGE_QUEUE_CAPACITY: usize = 256;

/// State shared between the owning thread and the capture worker.
pub(crate) struct SharedState {
    pub(crate) running: AtomicBool,
    pub(crate) record_intent: AtomicBool,
    pub(crate) failed: AtomicBool,
    pub(crate) check_trigger: AtomicBool,
    pub(crate) dropped_frames: AtomicU64,
    pub(crate) current_fps: AtomicU32,
    pub(crate) min_fluor: AtomicU8,
    pub(crate) max_fluor: AtomicU8,
    pub(crate) device_index: AtomicU32,
    pub(crate) settings: Mutex<ScopeSettings>,
    pub(crate) display: Mutex<DisplaySettings>,
    pub(crate) recording_config: Mutex<RecordingConfig>,
    pub(crate) record_start: Mutex<Option<DateTime<Utc>>>,
    pub(crate) ring: Mutex<FrameRing>,
    pub(crate) messages: MessageQueue,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            record_intent: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            check_trigger: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
            current_fps: AtomicU32::new(0),
            min_fluor: AtomicU8::new(0),
            max_fluor: AtomicU8::new(0),
            device_index: AtomicU32::new(0),
            settings: Mutex::new(ScopeSettings::default()),
            display: Mutex::new(DisplaySettings::default()),
            recording_config: Mutex::new(RecordingConfig::default()),
            record_start: Mutex::new(None),
            ring: Mutex::new(FrameRing::new()),
            messages: MessageQueue::new(MESSAGE_QUEUE_CAPACITY),
        }
    }

    /// Terminal failure path: clears running/recording, marks Failed, emits
    /// one diagnostic message. The worker exits after calling this.
    pub(crate) fn fail(&self, reason: impl Into<String>) {
        self.record_intent.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.failed.store(true, Ordering::SeqCst);
        self.messages.emit(reason);
    }
}

/// Controller for one miniature fluorescence scope.
///
/// # Example
///
/// ```
/// use miniscope_daq::device::mock::MockDeviceLink;
/// use miniscope_daq::encoder::EncoderStats;
/// use miniscope_daq::scope::ScopeController;
///
/// let stats = EncoderStats::new();
/// let mut scope = ScopeController::new(
///     Box::new(MockDeviceLink::new()),
///     EncoderStats::factory(&stats),
/// );
/// assert!(scope.connect(0));
/// assert!(scope.run());
/// scope.stop();
/// ```
pub struct ScopeController {
    shared: Arc<SharedState>,
    device: Arc<Mutex<Box<dyn DeviceLink>>>,
    encoder_factory: EncoderFactory,
    worker: Option<JoinHandle<()>>,
    connected: bool,
}

impl ScopeController {
    /// Create a controller over the given transport and encoder factory.
    pub fn new(device: Box<dyn DeviceLink>, encoder_factory: EncoderFactory) -> Self {
        Self {
            shared: Arc::new(SharedState::new()),
            device: Arc::new(Mutex::new(device)),
            encoder_factory,
            worker: None,
            connected: false,
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Connect to the device at `index`.
    ///
    /// Opens the transport, initializes the sensor, applies default settings
    /// and leaves the excitation LED off. Returns false without touching any
    /// state when already connected or when the device cannot be opened.
    pub fn connect(&mut self, index: u32) -> bool {
        if self.connected {
            tracing::error!("{}", ScopeError::AlreadyConnected);
            return false;
        }

        {
            let mut device = self.lock_device();
            if let Err(e) = device.open(index) {
                self.shared.messages.emit(
                    ScopeError::Open {
                        index,
                        message: e.to_string(),
                    }
                    .to_string(),
                );
                return false;
            }
        }

        self.shared.device_index.store(index, Ordering::SeqCst);
        self.send_init_command();

        // Apply defaults, then make sure the LED is off until asked for.
        {
            let mut settings = lock(&self.shared.settings);
            *settings = ScopeSettings::default();
        }
        let defaults = ScopeSettings::default();
        self.push_exposure(defaults.exposure());
        self.push_gain(defaults.gain());
        self.push_led(defaults.excitation());
        self.push_led(0);

        self.connected = true;
        self.shared.failed.store(false, Ordering::SeqCst);
        self.shared
            .messages
            .emit(format!("Initialized scope camera {index}"));
        true
    }

    /// Disconnect from the device, stopping any running capture first.
    /// Idempotent.
    pub fn disconnect(&mut self) {
        self.stop();
        {
            let mut device = self.lock_device();
            device.close();
        }
        self.connected = false;
        let index = self.shared.device_index.load(Ordering::SeqCst);
        self.shared
            .messages
            .emit(format!("Disconnected scope camera {index}"));
    }

    /// Whether the device is currently connected.
    pub fn connected(&self) -> bool {
        self.connected
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Set the sensor exposure (1-100; 0 is coerced to 1) and push it to the
    /// device when connected.
    pub fn set_exposure(&mut self, value: u8) {
        let clamped = {
            let mut settings = lock(&self.shared.settings);
            settings.set_exposure(value);
            settings.exposure()
        };
        self.push_exposure(clamped);
    }

    /// Current exposure setting.
    pub fn exposure(&self) -> u8 {
        lock(&self.shared.settings).exposure()
    }

    /// Set the sensor gain (0-100) and push it to the device when connected.
    pub fn set_gain(&mut self, value: u8) {
        let clamped = {
            let mut settings = lock(&self.shared.settings);
            settings.set_gain(value);
            settings.gain()
        };
        self.push_gain(clamped);
    }

    /// Current gain setting.
    pub fn gain(&self) -> u8 {
        lock(&self.shared.settings).gain()
    }

    /// Set the excitation LED power (0-100) and push it to the device when
    /// connected. The hardware receives at most half of the channel's full
    /// scale.
    pub fn set_excitation(&mut self, value: u8) {
        let clamped = {
            let mut settings = lock(&self.shared.settings);
            settings.set_excitation(value);
            settings.excitation()
        };
        self.push_led(clamped);
    }

    /// Current excitation LED power setting.
    pub fn excitation(&self) -> u8 {
        lock(&self.shared.settings).excitation()
    }

    /// Set the target acquisition frame rate used for encoder setup.
    pub fn set_target_fps(&mut self, fps: u32) {
        lock(&self.shared.settings).set_target_fps(fps);
    }

    /// Target acquisition frame rate.
    pub fn target_fps(&self) -> u32 {
        lock(&self.shared.settings).target_fps()
    }

    // =========================================================================
    // Acquisition control
    // =========================================================================

    /// Start the background capture loop.
    ///
    /// Fails when not connected. When in the failed state, one recovery
    /// reconnect is attempted first; if that fails, so does this call.
    pub fn run(&mut self) -> bool {
        if !self.connected {
            tracing::warn!("{}", ScopeError::NotConnected);
            return false;
        }
        if self.shared.failed.load(Ordering::SeqCst) {
            self.shared
                .messages
                .emit("Reconnecting to recover from previous failure.");
            let index = self.shared.device_index.load(Ordering::SeqCst);
            self.disconnect();
            if !self.connect(index) {
                return false;
            }
        }
        self.start_worker()
    }

    /// Stop the capture loop and wait for the worker to exit.
    ///
    /// Clears the recording intent first, so any open recording session is
    /// finalized before this returns. Idempotent.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.record_intent.store(false, Ordering::SeqCst);
        self.join_worker();
    }

    /// Whether the capture loop is running.
    pub fn running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Whether the controller is in the failed state.
    pub fn failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Recording control
    // =========================================================================

    /// Arm recording, starting the capture loop first if necessary.
    ///
    /// An empty `filename` keeps the previously configured output path.
    pub fn start_recording(&mut self, filename: &str) -> bool {
        if !self.connected {
            tracing::warn!("{}", ScopeError::NotConnected);
            return false;
        }
        if !self.running() && !self.run() {
            return false;
        }

        if !filename.is_empty() {
            lock(&self.shared.recording_config).filename = filename.to_string();
        }
        *lock(&self.shared.record_start) = Some(Utc::now());
        self.shared.record_intent.store(true, Ordering::SeqCst);
        true
    }

    /// Disarm recording. Non-blocking; the capture loop finalizes the session
    /// on its next cycle.
    pub fn stop_recording(&mut self) {
        self.shared.record_intent.store(false, Ordering::SeqCst);
    }

    /// Whether frames are being recorded (running with recording armed).
    pub fn recording(&self) -> bool {
        self.running() && self.shared.record_intent.load(Ordering::SeqCst)
    }

    /// Timestamp of the most recent recording arm, if any.
    pub fn recording_started_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.shared.record_start)
    }

    /// Output path for the next recording.
    pub fn video_filename(&self) -> String {
        lock(&self.shared.recording_config).filename.clone()
    }

    /// Set the output path for the next recording.
    pub fn set_video_filename(&mut self, filename: &str) {
        lock(&self.shared.recording_config).filename = filename.to_string();
    }

    /// Video codec for the next recording.
    pub fn video_codec(&self) -> VideoCodec {
        lock(&self.shared.recording_config).codec
    }

    /// Set the video codec for the next recording.
    pub fn set_video_codec(&mut self, codec: VideoCodec) {
        lock(&self.shared.recording_config).codec = codec;
    }

    /// Container format for the next recording.
    pub fn video_container(&self) -> VideoContainer {
        lock(&self.shared.recording_config).container
    }

    /// Set the container format for the next recording.
    pub fn set_video_container(&mut self, container: VideoContainer) {
        lock(&self.shared.recording_config).container = container;
    }

    /// Whether lossless encoding is requested.
    pub fn record_lossless(&self) -> bool {
        lock(&self.shared.recording_config).lossless
    }

    /// Request lossless encoding for the next recording.
    pub fn set_record_lossless(&mut self, lossless: bool) {
        lock(&self.shared.recording_config).lossless = lossless;
    }

    /// Whether the hardware record trigger is being polled.
    pub fn external_record_trigger(&self) -> bool {
        self.shared.check_trigger.load(Ordering::SeqCst)
    }

    /// Enable or disable polling of the hardware record trigger.
    pub fn set_external_record_trigger(&mut self, enabled: bool) {
        self.shared.check_trigger.store(enabled, Ordering::SeqCst);
    }

    // =========================================================================
    // Display
    // =========================================================================

    /// Pop the oldest buffered display frame, if any.
    pub fn current_frame(&self) -> Option<Frame> {
        lock(&self.shared.ring).pop()
    }

    /// Acquisition rate measured over the most recent frame pair.
    pub fn current_fps(&self) -> u32 {
        self.shared.current_fps.load(Ordering::SeqCst)
    }

    /// Dropped frames since the last settings resync.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::SeqCst)
    }

    /// Whether the stream is treated as color.
    pub fn use_color(&self) -> bool {
        lock(&self.shared.display).use_color
    }

    /// Switch between color and fluorescence-grayscale display shaping.
    pub fn set_use_color(&mut self, color: bool) {
        lock(&self.shared.display).use_color = color;
    }

    /// Choose which color channels stay visible in color mode.
    pub fn set_visible_channels(&mut self, red: bool, green: bool, blue: bool) {
        let mut display = lock(&self.shared.display);
        display.show_red = red;
        display.show_green = green;
        display.show_blue = blue;
    }

    /// Whether the red channel is shown in color mode.
    pub fn show_red_channel(&self) -> bool {
        lock(&self.shared.display).show_red
    }

    /// Whether the green channel is shown in color mode.
    pub fn show_green_channel(&self) -> bool {
        lock(&self.shared.display).show_green
    }

    /// Whether the blue channel is shown in color mode.
    pub fn show_blue_channel(&self) -> bool {
        lock(&self.shared.display).show_blue
    }

    /// Set the fluorescence display window mapped onto the full 8-bit range.
    pub fn set_fluorescence_display_range(&mut self, min: u8, max: u8) {
        let mut display = lock(&self.shared.display);
        display.min_fluor_display = min;
        display.max_fluor_display = max;
    }

    /// Measured minimum intensity of the latest grayscale frame.
    pub fn min_fluorescence(&self) -> u8 {
        self.shared.min_fluor.load(Ordering::SeqCst)
    }

    /// Measured maximum intensity of the latest grayscale frame.
    pub fn max_fluorescence(&self) -> u8 {
        self.shared.max_fluor.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Install the operator message sink.
    ///
    /// The sink runs on whichever thread emitted the message with no
    /// controller lock held; it must not call back into this controller.
    /// Without a sink, messages queue up for [`ScopeController::next_message`].
    pub fn set_on_message(&mut self, sink: MessageSink) {
        self.shared.messages.set_sink(sink);
    }

    /// Pop the oldest undrained operator message.
    pub fn next_message(&self) -> Option<String> {
        self.shared.messages.next()
    }

    /// Drain all pending operator messages in emission order.
    pub fn drain_messages(&self) -> Vec<String> {
        self.shared.messages.drain()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn start_worker(&mut self) -> bool {
        // Never more than one worker: fully stop any prior one first.
        self.shared.running.store(false, Ordering::SeqCst);
        self.join_worker();

        self.shared.running.store(true, Ordering::SeqCst);
        let worker = CaptureWorker::new(
            self.shared.clone(),
            self.device.clone(),
            self.encoder_factory.clone(),
        );
        match std::thread::Builder::new()
            .name("scope-capture".into())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                self.worker = Some(handle);
                true
            }
            Err(e) => {
                tracing::error!("failed to spawn capture worker: {e}");
                self.shared.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("capture worker panicked");
            }
        }
    }

    fn send_init_command(&self) {
        let words = match DeviceCommand::InitSensor.encode() {
            Ok(words) => words,
            Err(e) => {
                tracing::error!("sensor init command encode failed: {e}");
                return;
            }
        };
        let mut device = self.lock_device();
        for word in words {
            if let Err(e) = device.write_control(ControlChannel::Command, f64::from(word.tag)) {
                tracing::warn!("sensor init write failed: {e}");
            }
        }
    }

    fn push_exposure(&self, value: u8) {
        if !self.device_open() {
            return;
        }
        let mut device = self.lock_device();
        if let Err(e) = device.write_control(ControlChannel::Exposure, exposure_control_value(value))
        {
            tracing::warn!("exposure write failed: {e}");
        }
    }

    fn push_gain(&self, value: u8) {
        if !self.device_open() {
            return;
        }
        let mut device = self.lock_device();
        if let Err(e) = device.write_control(ControlChannel::Gain, gain_control_value(value)) {
            tracing::warn!("gain write failed: {e}");
        }
    }

    fn push_led(&self, value: u8) {
        if !self.device_open() {
            return;
        }
        let mut device = self.lock_device();
        if let Err(e) = device.write_control(ControlChannel::LedPower, led_control_value(value)) {
            tracing::warn!("LED power write failed: {e}");
        }
    }

    fn device_open(&self) -> bool {
        self.lock_device().is_open()
    }

    fn lock_device(&self) -> std::sync::MutexGuard<'_, Box<dyn DeviceLink>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ScopeController {
    /// Power the LED down, stop the worker and release the device, finalizing
    /// any open recording on the way.
    fn drop(&mut self) {
        self.stop();
        self.set_excitation(0);
        self.disconnect();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
