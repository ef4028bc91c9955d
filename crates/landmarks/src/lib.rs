//! Hand landmark model for the detection pipeline.
//!
//! A detected hand is 21 normalized keypoints (wrist, then four joints per
//! finger from thumb to pinky). Extractors hand us loosely-typed points; the
//! normalizer turns the first detected hand into a [`LandmarkFrame`] that is
//! safe to put on the wire.

mod normalize;
mod point;
pub mod skeleton;

pub use normalize::{normalize, normalize_json};
pub use point::{FrameShapeError, LandmarkFrame, LandmarkPoint, RawHand, RawPoint};

/// Number of keypoints in the hand model.
pub const HAND_LANDMARK_COUNT: usize = 21;
