//! Frame data types and the live-view buffer.

pub mod frame;
pub mod frame_ring;
pub mod shaping;

pub use frame::Frame;
pub use frame_ring::FrameRing;
