//! Device transport seam.
//!
//! The physical capture transport (UVC/V4L, vendor SDK, ...) lives behind the
//! [`DeviceLink`] trait. The library drives it through a small set of numeric
//! control channels that double as the command path: plain settings are
//! written as scaled values, while register-level sub-commands are
//! multiplexed through sentinel codes (see [`command`]).

pub mod command;
pub mod mock;

use crate::data::Frame;
use anyhow::Result;

/// Generic numeric control channels exposed by the capture transport.
///
/// These map onto image-property channels of the underlying transport; the
/// scope firmware repurposes them as its settings/command interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlChannel {
    /// Sensor exposure (0..1 scale on the wire).
    Exposure,
    /// Sensor gain (0..1 scale on the wire).
    Gain,
    /// Excitation LED power (0..0.5 scale on the wire, see half-scale cap).
    LedPower,
    /// Command/status channel: written to issue sentinel commands, read to
    /// poll the device status bitmask.
    Command,
}

/// Physical device transport consumed by the capture loop.
///
/// Acquisition is two-phase, mirroring the sensor's exposure model: `grab`
/// begins the exposure capture, `retrieve` decodes the exposed image. A grab
/// failure means the transport itself is gone; a retrieve failure is a
/// transient decode problem handled as a dropped frame.
///
/// Implementations must be `Send`: the capture worker owns the link while
/// running and the owning thread pushes settings through it between cycles.
pub trait DeviceLink: Send {
    /// Open the device at the given index.
    fn open(&mut self, index: u32) -> Result<()>;

    /// Close the device. Safe to call when already closed.
    fn close(&mut self);

    /// Whether the device is currently open.
    fn is_open(&self) -> bool;

    /// Begin an exposure capture.
    fn grab(&mut self) -> Result<()>;

    /// Decode the exposed image into an owned frame.
    fn retrieve(&mut self) -> Result<Frame>;

    /// Write a value to a control channel.
    fn write_control(&mut self, channel: ControlChannel, value: f64) -> Result<()>;

    /// Read the current value of a control channel.
    fn read_control(&mut self, channel: ControlChannel) -> Result<f64>;
}
