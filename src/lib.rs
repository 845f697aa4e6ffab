//! # Miniscope DAQ Library
//!
//! Acquisition and recording library for miniature fluorescence-imaging
//! microscopes ("miniscopes"). It drives one head-mounted scope camera over a
//! pluggable transport: connection lifecycle, sensor settings, a background
//! capture loop with drop recovery, a bounded live-view frame buffer, and a
//! recording pipeline that feeds frames to a pluggable video encoder.
//!
//! ## Crate Structure
//!
//! - **`scope`**: The [`scope::ScopeController`] facade, the single public
//!   entry point for embedding applications.
//! - **`device`**: The [`device::DeviceLink`] transport trait, the sensor
//!   command protocol with its register-write encoding, and a scriptable
//!   [`device::mock::MockDeviceLink`] for tests.
//! - **`encoder`**: The [`encoder::VideoEncoder`] seam plus a counting mock.
//! - **`recording`**: The recording session state machine that opens, feeds
//!   and finalizes an encoder.
//! - **`data`**: Owned [`data::Frame`]s, display shaping (channel masking,
//!   fluorescence rescaling) and the bounded live-view ring.
//! - **`settings`**: Serde-derived sensor, display and recording settings.
//! - **`messages`**: The bounded operator message queue.
//! - **`error`**: The [`error::ScopeError`] enum for centralized error
//!   handling.
//!
//! The capture loop itself lives in a private `capture` module; applications
//! only ever see it through the controller.
//!
//! ## Example
//!
//! ```
//! use miniscope_daq::device::mock::MockDeviceLink;
//! use miniscope_daq::encoder::EncoderStats;
//! use miniscope_daq::ScopeController;
//!
//! let stats = EncoderStats::new();
//! let mut scope = ScopeController::new(
//!     Box::new(MockDeviceLink::new()),
//!     EncoderStats::factory(&stats),
//! );
//! assert!(scope.connect(0));
//! scope.set_excitation(20);
//! assert!(scope.run());
//! // ... poll scope.current_frame() for display ...
//! scope.stop();
//! ```

pub mod data;
pub mod device;
pub mod encoder;
pub mod error;
pub mod messages;
pub mod recording;
pub mod scope;
pub mod settings;

pub(crate) mod capture;

pub use data::{Frame, FrameRing};
pub use error::{ScopeError, ScopeResult};
pub use scope::ScopeController;
pub use settings::{DisplaySettings, RecordingConfig, ScopeSettings, VideoCodec, VideoContainer};
