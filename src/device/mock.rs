//! Mock capture transport.
//!
//! Simulated scope hardware for testing without a physical device. The mock
//! produces synthetic grayscale frames with the frame sequence number stamped
//! into the first two pixels, so tests can verify ordering end to end, and it
//! supports scripted fault injection (grab failures, retrieve failures) to
//! exercise the capture loop's recovery paths.
//!
//! A [`MockDeviceHandle`] stays usable after the link itself has been handed
//! to the controller, letting tests pace acquisition with a frame budget and
//! inspect every control-channel write the library performed.

use crate::data::Frame;
use crate::device::{ControlChannel, DeviceLink};
use anyhow::{anyhow, Result};
use rand::Rng;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Inspectable state shared between the link and its handle.
#[derive(Debug, Clone)]
pub struct MockDeviceState {
    /// Whether the device is currently open.
    pub open: bool,
    /// Number of successful `open` calls (reconnects included).
    pub open_count: u32,
    /// Frames successfully retrieved so far.
    pub frames_served: u64,
    /// Every control write performed, in order.
    pub control_writes: Vec<(ControlChannel, f64)>,
    /// Value returned when the command/status channel is read.
    pub status_bits: i64,
    /// Remaining frames before `grab` blocks; None means unlimited.
    pub frame_budget: Option<u64>,
    /// Retrieve failures still to inject.
    pub retrieve_failures_remaining: u64,
    /// Fail every retrieve until cleared.
    pub fail_all_retrieves: bool,
    /// Fail the next grab (fatal for the capture loop).
    pub fail_grab: bool,
    /// Fail `open` calls, simulating a missing device.
    pub fail_open: bool,
    /// Last written value per control channel (exposure, gain, led, command).
    pub controls: [f64; 4],
}

impl Default for MockDeviceState {
    fn default() -> Self {
        Self {
            open: false,
            open_count: 0,
            frames_served: 0,
            control_writes: Vec::new(),
            status_bits: 0,
            frame_budget: None,
            retrieve_failures_remaining: 0,
            fail_all_retrieves: false,
            fail_grab: false,
            fail_open: false,
            controls: [0.0; 4],
        }
    }
}

fn channel_index(channel: ControlChannel) -> usize {
    match channel {
        ControlChannel::Exposure => 0,
        ControlChannel::Gain => 1,
        ControlChannel::LedPower => 2,
        ControlChannel::Command => 3,
    }
}

struct MockInner {
    state: Mutex<MockDeviceState>,
    budget_released: Condvar,
}

impl MockInner {
    fn lock(&self) -> MutexGuard<'_, MockDeviceState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Test-side handle for scripting and inspecting a [`MockDeviceLink`].
#[derive(Clone)]
pub struct MockDeviceHandle {
    inner: Arc<MockInner>,
}

impl MockDeviceHandle {
    /// Snapshot the current mock state.
    pub fn snapshot(&self) -> MockDeviceState {
        self.inner.lock().clone()
    }

    /// Set the status bitmask returned by command-channel reads.
    pub fn set_status_bits(&self, bits: i64) {
        self.inner.lock().status_bits = bits;
    }

    /// Grant `count` additional frames to a gated device.
    ///
    /// A device starts ungated (unlimited); the first call to this switches
    /// it to budgeted pacing.
    pub fn allow_frames(&self, count: u64) {
        {
            let mut state = self.inner.lock();
            let budget = state.frame_budget.unwrap_or(0);
            state.frame_budget = Some(budget + count);
        }
        self.inner.budget_released.notify_all();
    }

    /// Remove the frame budget, letting acquisition free-run again.
    pub fn release_gate(&self) {
        self.inner.lock().frame_budget = None;
        self.inner.budget_released.notify_all();
    }

    /// Inject `count` consecutive retrieve failures.
    pub fn fail_next_retrieves(&self, count: u64) {
        self.inner.lock().retrieve_failures_remaining = count;
    }

    /// Fail every retrieve until called again with `false`.
    pub fn fail_all_retrieves(&self, fail: bool) {
        self.inner.lock().fail_all_retrieves = fail;
    }

    /// Fail the next grab call.
    pub fn fail_grab(&self, fail: bool) {
        self.inner.lock().fail_grab = fail;
    }

    /// Make `open` calls fail, simulating an unplugged device.
    pub fn fail_open(&self, fail: bool) {
        self.inner.lock().fail_open = fail;
    }

    /// Control writes recorded since the last call, clearing the log.
    pub fn take_control_writes(&self) -> Vec<(ControlChannel, f64)> {
        std::mem::take(&mut self.inner.lock().control_writes)
    }
}

/// Simulated scope camera implementing [`DeviceLink`].
pub struct MockDeviceLink {
    inner: Arc<MockInner>,
    width: u32,
    height: u32,
    frame_delay: Duration,
}

impl MockDeviceLink {
    /// Create a mock producing 64x48 grayscale frames with a 1ms readout.
    pub fn new() -> Self {
        Self::with_geometry(64, 48)
    }

    /// Create a mock with a specific frame geometry.
    pub fn with_geometry(width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(MockInner {
                state: Mutex::new(MockDeviceState::default()),
                budget_released: Condvar::new(),
            }),
            width,
            height,
            frame_delay: Duration::from_millis(1),
        }
    }

    /// Override the simulated readout time per frame.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Handle for scripting and inspection; stays valid after the link moves
    /// into the controller.
    pub fn handle(&self) -> MockDeviceHandle {
        MockDeviceHandle {
            inner: self.inner.clone(),
        }
    }

    fn synthetic_frame(&self, sequence: u64) -> Frame {
        let mut rng = rand::thread_rng();
        let mut data =
            vec![0u8; (self.width * self.height) as usize];
        for value in data.iter_mut() {
            // Dim noise floor, as a dark fluorescence field would show.
            *value = rng.gen_range(8..24);
        }
        // Stamp the sequence number into the first two pixels for ordering
        // checks downstream.
        data[0] = sequence as u8;
        data[1] = (sequence >> 8) as u8;
        Frame::from_bytes(self.width, self.height, 1, data)
            .unwrap_or_else(|| Frame::filled(self.width, self.height, 1, [0; 3]))
    }
}

impl Default for MockDeviceLink {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLink for MockDeviceLink {
    fn open(&mut self, index: u32) -> Result<()> {
        let mut state = self.inner.lock();
        if state.fail_open {
            return Err(anyhow!("no capture device at index {index}"));
        }
        state.open = true;
        state.open_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.inner.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn grab(&mut self) -> Result<()> {
        let mut state = self.inner.lock();
        if !state.open {
            return Err(anyhow!("device not open"));
        }
        if state.fail_grab {
            return Err(anyhow!("simulated grab failure"));
        }

        // Budgeted pacing: wait until a frame is granted. Slices keep the
        // wait responsive to budget changes from the test thread.
        loop {
            match state.frame_budget {
                None => break,
                Some(budget) if budget > 0 => {
                    state.frame_budget = Some(budget - 1);
                    break;
                }
                Some(_) => {
                    let (next, _timeout) = self
                        .inner
                        .budget_released
                        .wait_timeout(state, Duration::from_millis(10))
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    state = next;
                    if state.fail_grab {
                        return Err(anyhow!("simulated grab failure"));
                    }
                }
            }
        }
        Ok(())
    }

    fn retrieve(&mut self) -> Result<Frame> {
        {
            let mut state = self.inner.lock();
            if state.fail_all_retrieves {
                return Err(anyhow!("simulated decode failure"));
            }
            if state.retrieve_failures_remaining > 0 {
                state.retrieve_failures_remaining -= 1;
                return Err(anyhow!("simulated decode failure"));
            }
        }

        // Readout time, outside the state lock.
        std::thread::sleep(self.frame_delay);

        let mut state = self.inner.lock();
        state.frames_served += 1;
        let sequence = state.frames_served;
        drop(state);
        Ok(self.synthetic_frame(sequence))
    }

    fn write_control(&mut self, channel: ControlChannel, value: f64) -> Result<()> {
        let mut state = self.inner.lock();
        state.controls[channel_index(channel)] = value;
        state.control_writes.push((channel, value));
        Ok(())
    }

    fn read_control(&mut self, channel: ControlChannel) -> Result<f64> {
        let state = self.inner.lock();
        if channel == ControlChannel::Command {
            return Ok(state.status_bits as f64);
        }
        Ok(state.controls[channel_index(channel)])
    }
}
