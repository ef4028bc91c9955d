//! Landmark points and frames.

use serde::{Deserialize, Deserializer, Serialize};

use crate::HAND_LANDMARK_COUNT;

/// A single keypoint, normalized to the source image (x/y roughly in `[0, 1]`,
/// z is depth relative to the wrist).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl LandmarkPoint {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// A point as reported by an extractor, before validation.
///
/// Any coordinate may be missing or non-numeric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct RawPoint {
    #[serde(default, deserialize_with = "lenient_coord")]
    pub x: Option<f32>,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub y: Option<f32>,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub z: Option<f32>,
}

impl RawPoint {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// Coerce to a landmark point; missing or non-finite coordinates become `0`.
    pub fn coerce(&self) -> LandmarkPoint {
        LandmarkPoint {
            x: finite_or_zero(self.x),
            y: finite_or_zero(self.y),
            z: finite_or_zero(self.z),
        }
    }
}

impl From<LandmarkPoint> for RawPoint {
    fn from(p: LandmarkPoint) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

/// One detected hand as an ordered point sequence.
pub type RawHand = Vec<RawPoint>;

fn finite_or_zero(value: Option<f32>) -> f32 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn lenient_coord<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64().map(|v| v as f32))
}

/// Error returned when a point sequence does not match the hand model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected {HAND_LANDMARK_COUNT} landmarks, got {got}")]
pub struct FrameShapeError {
    pub got: usize,
}

/// Exactly [`HAND_LANDMARK_COUNT`] points for one hand in one video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkFrame {
    points: [LandmarkPoint; HAND_LANDMARK_COUNT],
}

impl LandmarkFrame {
    pub fn points(&self) -> &[LandmarkPoint] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<&LandmarkPoint> {
        self.points.get(index)
    }

    pub fn wrist(&self) -> &LandmarkPoint {
        &self.points[crate::skeleton::WRIST]
    }
}

impl TryFrom<Vec<LandmarkPoint>> for LandmarkFrame {
    type Error = FrameShapeError;

    fn try_from(points: Vec<LandmarkPoint>) -> Result<Self, Self::Error> {
        let got = points.len();
        let points: [LandmarkPoint; HAND_LANDMARK_COUNT] =
            points.try_into().map_err(|_| FrameShapeError { got })?;
        Ok(Self { points })
    }
}

impl TryFrom<&[LandmarkPoint]> for LandmarkFrame {
    type Error = FrameShapeError;

    fn try_from(points: &[LandmarkPoint]) -> Result<Self, Self::Error> {
        let points: [LandmarkPoint; HAND_LANDMARK_COUNT] = points
            .try_into()
            .map_err(|_| FrameShapeError { got: points.len() })?;
        Ok(Self { points })
    }
}
