//! Error types for capture and landmark extraction.

use std::path::PathBuf;

use thiserror::Error;

/// Camera could not be started.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The user (or the platform) refused camera access.
    #[error("camera permission denied")]
    PermissionDenied,

    /// No usable device, or the device is busy.
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture loop already running")]
    AlreadyRunning,
}

/// The landmark extractor failed on a frame.
#[derive(Debug, Error)]
pub enum LandmarkerError {
    /// The extractor is not ready (model not loaded, data exhausted).
    #[error("landmarker unavailable: {0}")]
    Unavailable(String),

    #[error("landmark detection failed: {0}")]
    Detection(String),
}

/// A recorded landmark session could not be loaded.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read recording '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid recording line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
