//! Conversion of extractor output into wire-ready landmark frames.
//!
//! Only the first detected hand is forwarded. Coordinates that are missing or
//! not numbers become `0`; a hand whose point count is not
//! [`HAND_LANDMARK_COUNT`] is rejected.

use serde_json::Value;

use crate::point::{LandmarkFrame, LandmarkPoint, RawHand, RawPoint};
use crate::HAND_LANDMARK_COUNT;

/// Normalize typed extractor output.
///
/// Returns `None` (and logs a warning) when there is no hand, the first hand
/// has no points, or the point count does not match the hand model.
pub fn normalize(hands: &[RawHand]) -> Option<LandmarkFrame> {
    let Some(first) = hands.first() else {
        tracing::warn!("No hand detections to normalize");
        return None;
    };
    if first.is_empty() {
        tracing::warn!("First hand has no landmarks");
        return None;
    }

    let points: Vec<LandmarkPoint> = first.iter().map(RawPoint::coerce).collect();
    into_frame(points)
}

/// Normalize untyped detections (e.g. a JSON array of hands).
///
/// Any shape other than "array of arrays of point objects" for the first hand
/// is rejected; individual points that are not objects coerce to the origin.
pub fn normalize_json(detections: &Value) -> Option<LandmarkFrame> {
    let Some(hands) = detections.as_array() else {
        tracing::warn!("Landmark detections are not a sequence");
        return None;
    };
    let Some(first) = hands.first() else {
        tracing::warn!("No hand detections to normalize");
        return None;
    };
    let Some(points) = first.as_array() else {
        tracing::warn!("First hand landmarks are not a sequence");
        return None;
    };
    if points.is_empty() {
        tracing::warn!("First hand has no landmarks");
        return None;
    }

    let points: Vec<LandmarkPoint> = points
        .iter()
        .map(|p| {
            LandmarkPoint::new(
                json_coord(p, "x"),
                json_coord(p, "y"),
                json_coord(p, "z"),
            )
        })
        .collect();
    into_frame(points)
}

fn json_coord(point: &Value, key: &str) -> f32 {
    point
        .get(key)
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn into_frame(points: Vec<LandmarkPoint>) -> Option<LandmarkFrame> {
    match LandmarkFrame::try_from(points) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(
                expected = HAND_LANDMARK_COUNT,
                got = e.got,
                "Dropping hand with unexpected landmark count"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn well_formed_hand() -> RawHand {
        (0..HAND_LANDMARK_COUNT)
            .map(|i| RawPoint::new(i as f32 * 0.04, 1.0 - i as f32 * 0.04, -0.01 * i as f32))
            .collect()
    }

    #[test]
    fn test_identity_for_well_formed_hand() {
        let hand = well_formed_hand();
        let frame = normalize(&[hand.clone()]).unwrap();

        assert_eq!(frame.points().len(), HAND_LANDMARK_COUNT);
        for (raw, point) in hand.iter().zip(frame.points()) {
            assert_eq!(raw.coerce(), *point);
        }
    }

    #[test]
    fn test_only_first_hand_is_used() {
        let first = well_formed_hand();
        let second: RawHand = vec![RawPoint::new(0.9, 0.9, 0.9); HAND_LANDMARK_COUNT];

        let frame = normalize(&[first.clone(), second]).unwrap();
        assert_eq!(frame.points()[3], first[3].coerce());
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(normalize(&[]).is_none());
        assert!(normalize(&[Vec::new()]).is_none());
    }

    #[test]
    fn test_missing_coordinates_coerce_to_zero() {
        let mut hand = well_formed_hand();
        hand[5] = RawPoint {
            x: None,
            y: Some(0.5),
            z: None,
        };

        let frame = normalize(&[hand]).unwrap();
        assert_eq!(frame.points()[5], LandmarkPoint::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn test_wrong_point_count_is_rejected() {
        let mut hand = well_formed_hand();
        hand.pop();
        assert!(normalize(&[hand]).is_none());

        let mut hand = well_formed_hand();
        hand.push(RawPoint::default());
        assert!(normalize(&[hand]).is_none());
    }

    #[test]
    fn test_json_identity() {
        let hand: Vec<Value> = (0..HAND_LANDMARK_COUNT)
            .map(|i| json!({"x": 0.5, "y": i as f64 / 100.0, "z": 0.0}))
            .collect();
        let frame = normalize_json(&json!([hand])).unwrap();
        assert_eq!(frame.points()[7], LandmarkPoint::new(0.5, 0.07, 0.0));
    }

    #[test]
    fn test_json_malformed_inputs() {
        assert!(normalize_json(&Value::Null).is_none());
        assert!(normalize_json(&json!({"landmarks": []})).is_none());
        assert!(normalize_json(&json!([])).is_none());
        assert!(normalize_json(&json!(["not a hand"])).is_none());
        assert!(normalize_json(&json!([[]])).is_none());
    }

    #[test]
    fn test_json_non_numeric_coordinates_coerce() {
        let mut hand: Vec<Value> = (0..HAND_LANDMARK_COUNT)
            .map(|_| json!({"x": 0.1, "y": 0.2, "z": 0.3}))
            .collect();
        hand[0] = json!({"x": "left", "y": null});
        hand[1] = json!(42);

        let frame = normalize_json(&json!([hand])).unwrap();
        assert_eq!(frame.points()[0], LandmarkPoint::default());
        assert_eq!(frame.points()[1], LandmarkPoint::default());
        assert_eq!(frame.points()[2], LandmarkPoint::new(0.1, 0.2, 0.3));
    }
}
