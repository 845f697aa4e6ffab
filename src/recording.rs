//! Recording session lifecycle.
//!
//! The session is the only component allowed to touch the encoder. It is
//! driven once per capture cycle: when the recording intent is on and no
//! encoder is open, it configures and initializes a fresh one against the
//! current frame geometry; when the intent goes off it finalizes the encoder
//! and swaps in an uninitialized replacement so the next recording starts
//! with no residual codec or container state.
//!
//! Finalize is idempotent and safe on a never-initialized encoder, which lets
//! the capture loop call it unconditionally on every exit path.

use crate::data::Frame;
use crate::encoder::{EncoderFactory, VideoEncoder};
use crate::error::{ScopeError, ScopeResult};
use crate::messages::MessageQueue;
use crate::settings::RecordingConfig;

/// State machine governing encoder initialization and finalization.
pub struct RecordingSession {
    factory: EncoderFactory,
    encoder: Box<dyn VideoEncoder + Send>,
    active: bool,
}

impl RecordingSession {
    /// Create an idle session; the factory supplies one fresh encoder per
    /// activation.
    pub fn new(factory: EncoderFactory) -> Self {
        let encoder = factory();
        Self {
            factory,
            encoder,
            active: false,
        }
    }

    /// Whether an encoder is currently open and accepting frames.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Evaluate the session transitions for one capture cycle.
    ///
    /// `frame` is the cycle's record frame; activation takes the output
    /// geometry from it. An initialization failure is terminal for the
    /// capture loop and is returned as [`ScopeError::EncoderInit`].
    pub fn drive(
        &mut self,
        want_recording: bool,
        frame: &Frame,
        config: &RecordingConfig,
        fps: u32,
        messages: &MessageQueue,
    ) -> ScopeResult<()> {
        if want_recording {
            if !self.encoder.initialized() {
                messages.emit("Recording enabled.");
                self.encoder
                    .configure(config.codec, config.container, config.lossless);
                if let Err(e) = self.encoder.initialize(
                    &config.filename,
                    frame.width(),
                    frame.height(),
                    fps,
                    frame.is_color(),
                ) {
                    return Err(ScopeError::EncoderInit(e.to_string()));
                }
                self.active = true;
                messages.emit("Initialized video recording.");
            }
        } else if self.active {
            // Deactivation: flush the file and reset to a clean encoder.
            self.finalize(messages);
            self.encoder = (self.factory)();
            messages.emit("Recording finalized.");
        }
        Ok(())
    }

    /// Forward one frame to the active encoder.
    ///
    /// A failed encode is reported and the session stays active; losing one
    /// frame is preferable to tearing down the whole recording.
    pub fn record_frame(&mut self, frame: Frame, messages: &MessageQueue) {
        if !self.active {
            return;
        }
        if let Err(e) = self.encoder.encode(frame) {
            let err = ScopeError::EncoderRuntime(e.to_string());
            tracing::warn!("{err}");
            messages.emit(err.to_string());
        }
    }

    /// Finalize the encoder if it was ever initialized. Idempotent.
    pub fn finalize(&mut self, messages: &MessageQueue) {
        if let Err(e) = self.encoder.finalize() {
            tracing::error!("encoder finalize failed: {e}");
            messages.emit(format!("Failed to finalize recording: {e}"));
        }
        self.active = false;
    }
}
