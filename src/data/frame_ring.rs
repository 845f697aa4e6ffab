//! Bounded live-view frame buffer.
//!
//! The capture worker pushes display frames in acquisition order; the owning
//! thread pops them front-to-back for display. When the buffer is full the
//! oldest frame is overwritten rather than blocking the producer - a stale
//! live view is worthless, so losing the oldest entries is the right policy.
//!
//! The ring itself is a plain single-threaded structure; the controller wraps
//! it in the one buffer mutex the concurrency model allows, holding the lock
//! only for the push or pop itself.

use crate::data::Frame;
use std::collections::VecDeque;

/// Number of display frames retained for live inspection.
pub const FRAME_RING_CAPACITY: usize = 64;

/// Fixed-capacity FIFO of display frames with overwrite-on-full semantics.
#[derive(Debug, Default)]
pub struct FrameRing {
    frames: VecDeque<Frame>,
}

impl FrameRing {
    /// Create an empty ring.
    pub fn new() -> Self {
        Self {
            frames: VecDeque::with_capacity(FRAME_RING_CAPACITY),
        }
    }

    /// Append a frame, evicting the oldest one when the ring is full.
    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() == FRAME_RING_CAPACITY {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Remove and return the oldest buffered frame.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the ring holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Discard all buffered frames.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
