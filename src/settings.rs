//! Scope and recording configuration structures.
//!
//! Settings are plain serde-derived structs with sensible defaults so an
//! embedding application can persist them alongside its own configuration.
//! Range handling follows the device contract: values are clamped at the
//! setter boundary, never rejected.

use serde::{Deserialize, Serialize};

/// Image acquisition settings for the scope sensor.
///
/// All values are expressed on the 0-100 operator scale; translation to
/// device control-channel values happens in the command protocol layer.
///
/// # Example
///
/// ```
/// use miniscope_daq::settings::ScopeSettings;
///
/// let mut settings = ScopeSettings::default();
/// settings.set_exposure(150);
/// assert_eq!(settings.exposure(), 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSettings {
    exposure: u8,
    gain: u8,
    excitation: u8,
    target_fps: u32,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            exposure: 100,
            gain: 32,
            excitation: 1,
            target_fps: 20,
        }
    }
}

impl ScopeSettings {
    /// Sensor exposure, 1-100.
    pub fn exposure(&self) -> u8 {
        self.exposure
    }

    /// Set the sensor exposure.
    ///
    /// The sensor does not accept a zero exposure, so 0 is coerced to 1 and
    /// values above 100 are capped at 100.
    pub fn set_exposure(&mut self, value: u8) {
        self.exposure = value.clamp(1, 100);
    }

    /// Sensor gain, 0-100.
    pub fn gain(&self) -> u8 {
        self.gain
    }

    /// Set the sensor gain, capped at 100.
    pub fn set_gain(&mut self, value: u8) {
        self.gain = value.min(100);
    }

    /// Excitation LED power, 0-100.
    pub fn excitation(&self) -> u8 {
        self.excitation
    }

    /// Set the excitation LED power, capped at 100.
    pub fn set_excitation(&mut self, value: u8) {
        self.excitation = value.min(100);
    }

    /// Target acquisition frame rate.
    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    /// Set the target acquisition frame rate.
    pub fn set_target_fps(&mut self, fps: u32) {
        self.target_fps = fps;
    }
}

/// Display shaping settings observed by the capture loop each cycle.
///
/// In color mode, individual channels can be blanked out for inspection.
/// In grayscale mode, the display copy is linearly rescaled into the
/// configured fluorescence display range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Treat the sensor stream as color (3 channel) rather than fluorescence grayscale.
    pub use_color: bool,
    /// Show the red channel in color mode.
    pub show_red: bool,
    /// Show the green channel in color mode.
    pub show_green: bool,
    /// Show the blue channel in color mode.
    pub show_blue: bool,
    /// Lower bound of the fluorescence display range.
    pub min_fluor_display: u8,
    /// Upper bound of the fluorescence display range.
    pub max_fluor_display: u8,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            use_color: false,
            show_red: true,
            show_green: true,
            show_blue: true,
            min_fluor_display: 0,
            max_fluor_display: 255,
        }
    }
}

/// Video output configuration for a recording session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Output file path. An empty path at recording start keeps the previous one.
    pub filename: String,
    /// Video codec used by the encoder.
    pub codec: VideoCodec,
    /// Container format used by the encoder.
    pub container: VideoContainer,
    /// Request lossless encoding where the codec supports it.
    pub lossless: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            filename: String::new(),
            codec: VideoCodec::Vp9,
            container: VideoContainer::Matroska,
            lossless: false,
        }
    }
}

/// Video codecs the encoder seam can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    /// VP9, the default for fluorescence recordings.
    Vp9,
    /// FFV1, for lossless archival recordings.
    Ffv1,
    /// H.264 for broad playback compatibility.
    H264,
    /// Uncompressed raw frames.
    Raw,
}

/// Container formats the encoder seam can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoContainer {
    /// Matroska (.mkv), the default.
    Matroska,
    /// AVI (.avi).
    Avi,
}
