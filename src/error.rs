//! Custom error types for the library.
//!
//! This module defines the primary error type, `ScopeError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to represent the failure modes of scope control, from
//! connection problems to encoder trouble.
//!
//! Terminal capture-loop conditions never cross the worker/owner boundary as
//! error values: they funnel through the controller's internal failure path,
//! which clears the running/recording state and emits one diagnostic message.
//! `ScopeError` is what the synchronous public API and the hardware seams
//! report directly.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

/// Primary error type for scope control and acquisition.
///
/// # Error Categories
///
/// 1. **Connection errors** - `AlreadyConnected`, `NotConnected`, `Open`
///    - Occur during connect/disconnect or when an operation needs a device
///    - Recovery: connect (or reconnect) and retry
///
/// 2. **Capture errors** - `Capture`, `TooManyDroppedFrames`
///    - `Capture` is transient and handled inside the loop as a dropped frame
///    - `TooManyDroppedFrames` is terminal once the drop budget is exhausted
///
/// 3. **Encoder errors** - `EncoderInit`, `EncoderRuntime`
///    - Init failure is terminal for the capture loop
///    - Runtime failure on a single frame is reported and the session continues
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Tried to connect a scope that is already connected.
    #[error("Scope is already connected")]
    AlreadyConnected,

    /// An operation required a connected device.
    #[error("Scope is not connected")]
    NotConnected,

    /// Opening the physical device failed.
    #[error("Unable to open scope device {index}: {message}")]
    Open {
        /// Index of the device that failed to open.
        index: u32,
        /// Device-level detail.
        message: String,
    },

    /// A transient frame acquisition failure (recorded as a dropped frame).
    #[error("Frame acquisition failed: {0}")]
    Capture(String),

    /// The consecutive-drop budget was exhausted.
    #[error("Too many dropped frames. Giving up.")]
    TooManyDroppedFrames,

    /// The video encoder could not be initialized for a recording session.
    #[error("Unable to initialize recording: {0}")]
    EncoderInit(String),

    /// Encoding an individual frame failed.
    #[error("Failed to encode frame: {0}")]
    EncoderRuntime(String),
}
