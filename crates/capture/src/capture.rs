//! Capture loop - background thread that pulls frames, extracts hand
//! landmarks and hands them to a callback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use handsign_landmarks::RawHand;
use serde::Serialize;

use crate::error::CameraError;
use crate::overlay::{render_hands, OverlaySurface};
use crate::source::{HandLandmarker, VideoSource};

/// Callback invoked for every frame with at least one detected hand.
pub type LandmarksCallback = Arc<dyn Fn(&[RawHand]) + Send + Sync + 'static>;

/// Counters shared with the capture thread.
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames: AtomicU64,
    frames_with_hands: AtomicU64,
    extractor_errors: AtomicU64,
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureSnapshot {
    pub frames: u64,
    pub frames_with_hands: u64,
    pub extractor_errors: u64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureSnapshot {
        CaptureSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            frames_with_hands: self.frames_with_hands.load(Ordering::Relaxed),
            extractor_errors: self.extractor_errors.load(Ordering::Relaxed),
        }
    }
}

/// What the loop runs on: a frame source, an extractor, and optionally an
/// overlay to keep in sync with the detections.
pub struct CaptureResources {
    pub source: Box<dyn VideoSource>,
    pub landmarker: Box<dyn HandLandmarker>,
    pub overlay: Option<Box<dyn OverlaySurface>>,
}

impl CaptureResources {
    pub fn new(source: Box<dyn VideoSource>, landmarker: Box<dyn HandLandmarker>) -> Self {
        Self {
            source,
            landmarker,
            overlay: None,
        }
    }

    pub fn with_overlay(mut self, overlay: Box<dyn OverlaySurface>) -> Self {
        self.overlay = Some(overlay);
        self
    }
}

/// Background capture loop.
///
/// `start` opens the camera on the calling thread so a refused camera is
/// reported synchronously; frames are then processed on a dedicated thread
/// until `stop` is called or the stream ends.
pub struct CaptureLoop {
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
    stats: Arc<CaptureStats>,
}

impl Default for CaptureLoop {
    fn default() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            stats: Arc::new(CaptureStats::default()),
        }
    }
}

impl CaptureLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        resources: CaptureResources,
        callback: LandmarksCallback,
    ) -> Result<(), CameraError> {
        if self.running.load(Ordering::SeqCst) {
            tracing::warn!("CaptureLoop already running");
            return Err(CameraError::AlreadyRunning);
        }
        // A previous stream may have ended on its own; reap its thread.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        let CaptureResources {
            mut source,
            mut landmarker,
            mut overlay,
        } = resources;

        if let Err(e) = source.open() {
            tracing::warn!(error = %e, "Failed to open camera");
            source.close();
            return Err(e);
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);

        let handle = std::thread::Builder::new()
            .name("handsign-capture".to_string())
            .spawn(move || {
                tracing::info!("CaptureLoop started");

                while running.load(Ordering::SeqCst) {
                    let Some(frame) = source.next_frame() else {
                        tracing::info!("Video stream ended");
                        break;
                    };
                    stats.frames.fetch_add(1, Ordering::Relaxed);

                    let hands = match landmarker.detect(&frame) {
                        Ok(hands) => hands,
                        Err(e) => {
                            let errors = stats.extractor_errors.fetch_add(1, Ordering::Relaxed) + 1;
                            // Rate-limit logging: a broken extractor fails on every frame
                            if errors % 30 == 1 {
                                tracing::warn!(error = %e, errors, seq = frame.seq, "Landmark extraction failed, skipping frame");
                            }
                            continue;
                        }
                    };

                    if let Some(surface) = overlay.as_deref_mut() {
                        render_hands(surface, frame.size(), &hands);
                    }

                    if hands.is_empty() {
                        continue;
                    }
                    // Stop may have been requested while extracting
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    stats.frames_with_hands.fetch_add(1, Ordering::Relaxed);
                    callback(&hands);
                }

                source.close();
                running.store(false, Ordering::SeqCst);
                tracing::info!("CaptureLoop stopped");
            });

        match handle {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(CameraError::DeviceUnavailable(format!(
                    "failed to spawn capture thread: {e}"
                )))
            }
        }
    }

    /// Stop the loop and release the camera. Safe to call repeatedly.
    ///
    /// Called from the capture thread itself (inside the callback) this only
    /// signals the loop; the camera is released once the callback returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }

    /// Handle that can signal the loop to stop from any thread.
    pub fn stop_handle(&self) -> CaptureStopHandle {
        CaptureStopHandle {
            running: Arc::clone(&self.running),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureSnapshot {
        self.stats.snapshot()
    }
}

/// Signals a [`CaptureLoop`] to stop without waiting for it.
#[derive(Clone)]
pub struct CaptureStopHandle {
    running: Arc<AtomicBool>,
}

impl CaptureStopHandle {
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
