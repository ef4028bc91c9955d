//! Camera capture and hand landmark extraction.
//!
//! The platform camera and the landmark model sit behind two traits,
//! [`VideoSource`] and [`HandLandmarker`]. [`CaptureLoop`] drives them on a
//! dedicated thread and reports every frame that contains a hand. Recorded
//! sessions can be replayed through the same loop (see [`replay`]).

mod capture;
mod error;
mod overlay;
pub mod replay;
mod source;

pub use capture::{
    CaptureLoop, CaptureResources, CaptureSnapshot, CaptureStats, CaptureStopHandle,
    LandmarksCallback,
};
pub use error::{CameraError, LandmarkerError, ReplayError};
pub use overlay::{render_hands, ContainTransform, OverlaySurface, Size};
pub use source::{HandLandmarker, VideoFrame, VideoSource};
