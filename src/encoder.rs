//! Video encoder seam.
//!
//! The actual encoder/muxer implementation is an external collaborator; the
//! capture loop only needs the small lifecycle this trait captures:
//! configure, initialize against a concrete frame geometry, accept frames,
//! finalize. Finalize must be idempotent and safe on a never-initialized
//! encoder - the recording session leans on that to guarantee output files
//! are flushed no matter how the capture loop exits.

use crate::data::Frame;
use crate::settings::{VideoCodec, VideoContainer};
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Encoder lifecycle consumed by the recording session.
pub trait VideoEncoder: Send {
    /// Select codec, container and lossless mode. Must precede `initialize`.
    fn configure(&mut self, codec: VideoCodec, container: VideoContainer, lossless: bool);

    /// Open the output file and negotiate the codec against the frame
    /// geometry. Called at most once per encoder instance.
    fn initialize(
        &mut self,
        path: &str,
        width: u32,
        height: u32,
        fps: u32,
        is_color: bool,
    ) -> Result<()>;

    /// Whether `initialize` has succeeded on this instance.
    fn initialized(&self) -> bool;

    /// Encode one frame. Only valid after successful initialization.
    fn encode(&mut self, frame: Frame) -> Result<()>;

    /// Flush and close the output. Idempotent; a no-op when never initialized.
    fn finalize(&mut self) -> Result<()>;
}

/// Factory producing a fresh encoder per recording session activation.
pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn VideoEncoder + Send> + Send + Sync>;

/// Shared call counters for [`MockEncoder`] instances.
///
/// Counters aggregate across every encoder an [`EncoderFactory`] produced, so
/// a test observes a whole recording session (which swaps in a fresh encoder
/// after each finalize) through one handle.
#[derive(Debug, Default)]
pub struct EncoderStats {
    /// Successful `initialize` calls.
    pub init_calls: AtomicU64,
    /// Frames accepted by `encode`.
    pub encode_calls: AtomicU64,
    /// Observable finalizations (finalize on an initialized encoder).
    pub finalize_calls: AtomicU64,
    /// Encoder instances created by the factory.
    pub instances: AtomicU64,
    /// Inject an initialization failure.
    pub fail_initialize: AtomicBool,
    /// Inject a failure on every encode call.
    pub fail_encode: AtomicBool,
    /// Geometry of the most recent initialization (w, h, fps, is_color).
    pub last_geometry: Mutex<Option<(u32, u32, u32, bool)>>,
    /// Path of the most recent initialization.
    pub last_path: Mutex<Option<String>>,
}

impl EncoderStats {
    /// Create a stats block wrapped for sharing with a factory.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory producing [`MockEncoder`] instances reporting into `stats`.
    pub fn factory(stats: &Arc<Self>) -> EncoderFactory {
        let stats = stats.clone();
        Arc::new(move || {
            stats.instances.fetch_add(1, Ordering::SeqCst);
            Box::new(MockEncoder {
                stats: stats.clone(),
                configured: None,
                initialized: false,
            })
        })
    }
}

/// In-memory encoder used by the test suite.
pub struct MockEncoder {
    stats: Arc<EncoderStats>,
    configured: Option<(VideoCodec, VideoContainer, bool)>,
    initialized: bool,
}

impl VideoEncoder for MockEncoder {
    fn configure(&mut self, codec: VideoCodec, container: VideoContainer, lossless: bool) {
        self.configured = Some((codec, container, lossless));
    }

    fn initialize(
        &mut self,
        path: &str,
        width: u32,
        height: u32,
        fps: u32,
        is_color: bool,
    ) -> Result<()> {
        if self.initialized {
            return Err(anyhow!("encoder already initialized"));
        }
        if self.stats.fail_initialize.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated codec negotiation failure"));
        }
        self.initialized = true;
        self.stats.init_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut geometry) = self.stats.last_geometry.lock() {
            *geometry = Some((width, height, fps, is_color));
        }
        if let Ok(mut last_path) = self.stats.last_path.lock() {
            *last_path = Some(path.to_string());
        }
        Ok(())
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn encode(&mut self, _frame: Frame) -> Result<()> {
        if !self.initialized {
            return Err(anyhow!("encode on uninitialized encoder"));
        }
        if self.stats.fail_encode.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated encode failure"));
        }
        self.stats.encode_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        // Counts only observable finalizations: flushing a never-initialized
        // encoder is a no-op by contract.
        if self.initialized {
            self.initialized = false;
            self.stats.finalize_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::filled(4, 4, 1, [0; 3])
    }

    #[test]
    fn test_lifecycle_counts() {
        let stats = EncoderStats::new();
        let factory = EncoderStats::factory(&stats);
        let mut encoder = factory();

        encoder.configure(VideoCodec::Vp9, VideoContainer::Matroska, false);
        encoder.initialize("out.mkv", 64, 48, 20, false).unwrap();
        encoder.encode(frame()).unwrap();
        encoder.encode(frame()).unwrap();
        encoder.finalize().unwrap();

        assert_eq!(stats.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.encode_calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.finalize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *stats.last_geometry.lock().unwrap(),
            Some((64, 48, 20, false))
        );
    }

    #[test]
    fn test_finalize_idempotent_and_noop_when_uninitialized() {
        let stats = EncoderStats::new();
        let factory = EncoderStats::factory(&stats);
        let mut encoder = factory();

        encoder.finalize().unwrap();
        assert_eq!(stats.finalize_calls.load(Ordering::SeqCst), 0);

        encoder.initialize("out.mkv", 8, 8, 10, false).unwrap();
        encoder.finalize().unwrap();
        encoder.finalize().unwrap();
        assert_eq!(stats.finalize_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encode_requires_initialization() {
        let stats = EncoderStats::new();
        let factory = EncoderStats::factory(&stats);
        let mut encoder = factory();
        assert!(encoder.encode(frame()).is_err());
    }

    #[test]
    fn test_injected_init_failure() {
        let stats = EncoderStats::new();
        stats.fail_initialize.store(true, Ordering::SeqCst);
        let factory = EncoderStats::factory(&stats);
        let mut encoder = factory();
        assert!(encoder.initialize("out.mkv", 8, 8, 10, false).is_err());
        assert!(!encoder.initialized());
    }
}
