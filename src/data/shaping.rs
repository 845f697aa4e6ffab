//! Per-cycle frame shaping.
//!
//! Each successful capture cycle turns the sensor frame into two variants:
//! the *record* frame handed to the video encoder and the *display* frame for
//! the live-view ring. In color mode the display copy can have individual
//! channels blanked out while the record frame passes through untouched. In
//! grayscale mode both are converted to a single channel; only the display
//! copy is then linearly rescaled into the configured fluorescence display
//! range, so the recording keeps the unscaled intensities.

use crate::data::Frame;
use crate::settings::DisplaySettings;

const PLACEHOLDER_WIDTH: u32 = 752;
const PLACEHOLDER_HEIGHT: u32 = 480;

/// The two frame variants produced from one captured sensor frame.
pub struct ShapedFrame {
    /// Frame forwarded to the encoder while a recording session is active.
    pub record: Frame,
    /// Frame handed to the live-view ring.
    pub display: Frame,
    /// Measured minimum intensity of the grayscale frame (grayscale mode only).
    pub min_intensity: u8,
    /// Measured maximum intensity of the grayscale frame (grayscale mode only).
    pub max_intensity: u8,
}

/// Shape one captured frame according to the current display settings.
pub fn shape_frame(raw: Frame, settings: &DisplaySettings) -> ShapedFrame {
    if settings.use_color {
        let display = mask_channels(&raw, settings);
        ShapedFrame {
            record: raw,
            display,
            min_intensity: 0,
            max_intensity: 0,
        }
    } else {
        let gray = to_grayscale(&raw);
        let (min_intensity, max_intensity) = intensity_range(&gray);
        let display = rescale_display(
            &gray,
            settings.min_fluor_display,
            settings.max_fluor_display,
        );
        ShapedFrame {
            record: gray,
            display,
            min_intensity,
            max_intensity,
        }
    }
}

/// Blank out disabled color channels, leaving enabled ones untouched.
///
/// With every channel enabled (or a grayscale input) the frame passes through
/// as a plain copy.
pub fn mask_channels(frame: &Frame, settings: &DisplaySettings) -> Frame {
    if !frame.is_color()
        || (settings.show_red && settings.show_green && settings.show_blue)
    {
        return frame.clone();
    }

    let mut masked = frame.clone();
    // BGR interleaving: channel 0 blue, 1 green, 2 red.
    let keep = [settings.show_blue, settings.show_green, settings.show_red];
    for (i, value) in masked.data_mut().iter_mut().enumerate() {
        if !keep[i % 3] {
            *value = 0;
        }
    }
    masked
}

/// Convert a frame to single-channel grayscale.
///
/// Color input uses the ITU-R BT.601 luma weights; grayscale input is copied.
pub fn to_grayscale(frame: &Frame) -> Frame {
    if !frame.is_color() {
        return frame.clone();
    }

    let mut gray = Vec::with_capacity((frame.width() * frame.height()) as usize);
    for px in frame.data().chunks_exact(3) {
        let (b, g, r) = (f32::from(px[0]), f32::from(px[1]), f32::from(px[2]));
        let luma = 0.114 * b + 0.587 * g + 0.299 * r;
        gray.push(luma.round().min(255.0) as u8);
    }
    // Geometry is preserved, so construction cannot fail.
    Frame::from_bytes(frame.width(), frame.height(), 1, gray)
        .unwrap_or_else(|| Frame::filled(frame.width(), frame.height(), 1, [0; 3]))
}

/// Measured (min, max) pixel intensity of a frame.
pub fn intensity_range(frame: &Frame) -> (u8, u8) {
    if frame.data().is_empty() {
        return (0, 0);
    }
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for &v in frame.data() {
        min = min.min(v);
        max = max.max(v);
    }
    (min, max)
}

/// Linearly map pixel intensities so the `[min_display, max_display]` window
/// spans the full 8-bit output range.
///
/// Pixels below the window clamp to 0, above it to 255. A degenerate window
/// (max <= min) yields the input unchanged.
pub fn rescale_display(frame: &Frame, min_display: u8, max_display: u8) -> Frame {
    if max_display <= min_display {
        return frame.clone();
    }

    let scale = 255.0 / f32::from(max_display - min_display);
    let offset = f32::from(min_display);
    let mut rescaled = frame.clone();
    for value in rescaled.data_mut().iter_mut() {
        let mapped = (f32::from(*value) - offset) * scale;
        *value = mapped.clamp(0.0, 255.0) as u8;
    }
    rescaled
}

/// Synthetic stand-in frame pushed into the live-view ring when a frame is
/// dropped, so the operator sees that acquisition hiccupped instead of a
/// stale image.
pub fn dropped_frame_placeholder() -> Frame {
    // Solid red (BGR), same geometry as the sensor stream.
    Frame::filled(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, 3, [0, 0, 255])
}
