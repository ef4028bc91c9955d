//! Video and landmark extraction seams.

use std::sync::Arc;

use handsign_landmarks::RawHand;

use crate::error::{CameraError, LandmarkerError};
use crate::overlay::Size;

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub seq: u64,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    /// Packed RGB pixels. Empty for frames that only carry pre-extracted
    /// landmarks (recordings).
    pub pixels: Arc<[u8]>,
}

impl VideoFrame {
    pub fn new(seq: u64, timestamp_ms: i64, width: u32, height: u32) -> Self {
        Self {
            seq,
            timestamp_ms,
            width,
            height,
            pixels: Arc::from(Vec::new()),
        }
    }

    pub fn with_pixels(mut self, pixels: impl Into<Arc<[u8]>>) -> Self {
        self.pixels = pixels.into();
        self
    }

    pub fn size(&self) -> Size {
        Size::new(self.width as f32, self.height as f32)
    }
}

/// A camera (or anything that produces frames like one).
///
/// `next_frame` blocks until a frame is available and returns `None` once the
/// stream has ended. Implementations are driven from the capture thread.
pub trait VideoSource: Send {
    /// Acquire the device. Called once before the first frame.
    fn open(&mut self) -> Result<(), CameraError>;

    fn next_frame(&mut self) -> Option<VideoFrame>;

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self);
}

/// Hand landmark extractor.
pub trait HandLandmarker: Send {
    /// Detect hands in `frame`. An empty vector means no hand was found.
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<RawHand>, LandmarkerError>;
}
