//! Owned image frame type.

use chrono::{DateTime, Utc};

/// A single image frame with owned pixel storage.
///
/// Pixels are 8-bit, stored row-major with interleaved channels
/// (`BGR` ordering for 3-channel frames, matching the sensor stream).
/// Each frame carries its acquisition timestamp so downstream consumers can
/// reconstruct timing without trusting arrival order.
///
/// Ownership is explicit: handing a frame to the encoder moves it, and the
/// display copy for the live-view ring is the only clone made per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
    timestamp: DateTime<Utc>,
}

impl Frame {
    /// Create a frame from raw interleaved pixel data.
    ///
    /// `data.len()` must equal `width * height * channels` and `channels`
    /// must be 1 or 3; anything else is a construction bug, reported as None.
    pub fn from_bytes(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Option<Self> {
        if channels != 1 && channels != 3 {
            return None;
        }
        if data.len() != (width as usize) * (height as usize) * (channels as usize) {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
            timestamp: Utc::now(),
        })
    }

    /// Create a frame filled with a single per-channel value.
    pub fn filled(width: u32, height: u32, channels: u8, fill: [u8; 3]) -> Self {
        let pixel_count = (width as usize) * (height as usize);
        let data = match channels {
            3 => {
                let mut data = Vec::with_capacity(pixel_count * 3);
                for _ in 0..pixel_count {
                    data.extend_from_slice(&fill);
                }
                data
            }
            _ => vec![fill[0]; pixel_count],
        };
        Self {
            width,
            height,
            channels: if channels == 3 { 3 } else { 1 },
            data,
            timestamp: Utc::now(),
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of interleaved channels (1 or 3).
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Whether this is a 3-channel color frame.
    pub fn is_color(&self) -> bool {
        self.channels == 3
    }

    /// Acquisition timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Raw interleaved pixel data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the raw pixel data.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the frame, returning its pixel buffer.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Value of one channel of one pixel, or None when out of bounds.
    pub fn get(&self, x: u32, y: u32, channel: u8) -> Option<u8> {
        if x >= self.width || y >= self.height || channel >= self.channels {
            return None;
        }
        let idx = ((y * self.width + x) * u32::from(self.channels) + u32::from(channel)) as usize;
        self.data.get(idx).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_validates_geometry() {
        assert!(Frame::from_bytes(2, 2, 1, vec![0; 4]).is_some());
        assert!(Frame::from_bytes(2, 2, 3, vec![0; 12]).is_some());
        // Length mismatch
        assert!(Frame::from_bytes(2, 2, 1, vec![0; 5]).is_none());
        // Unsupported channel count
        assert!(Frame::from_bytes(2, 2, 2, vec![0; 8]).is_none());
    }

    #[test]
    fn test_filled_color_frame() {
        let frame = Frame::filled(2, 1, 3, [255, 0, 10]);
        assert!(frame.is_color());
        assert_eq!(frame.data(), &[255, 0, 10, 255, 0, 10]);
        assert_eq!(frame.get(1, 0, 2), Some(10));
        assert_eq!(frame.get(2, 0, 0), None);
    }

    #[test]
    fn test_get_gray_pixel() {
        let frame = Frame::from_bytes(3, 1, 1, vec![5, 6, 7]).unwrap();
        assert_eq!(frame.get(2, 0, 0), Some(7));
        assert_eq!(frame.get(0, 0, 1), None);
    }
}
