//! Keypoint indices and bone connections of the 21-point hand model.

pub const WRIST: usize = 0;
pub const THUMB_CMC: usize = 1;
pub const THUMB_MCP: usize = 2;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_FINGER_MCP: usize = 5;
pub const INDEX_FINGER_PIP: usize = 6;
pub const INDEX_FINGER_DIP: usize = 7;
pub const INDEX_FINGER_TIP: usize = 8;
pub const MIDDLE_FINGER_MCP: usize = 9;
pub const MIDDLE_FINGER_PIP: usize = 10;
pub const MIDDLE_FINGER_DIP: usize = 11;
pub const MIDDLE_FINGER_TIP: usize = 12;
pub const RING_FINGER_MCP: usize = 13;
pub const RING_FINGER_PIP: usize = 14;
pub const RING_FINGER_DIP: usize = 15;
pub const RING_FINGER_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_PIP: usize = 18;
pub const PINKY_DIP: usize = 19;
pub const PINKY_TIP: usize = 20;

/// Bones drawn by the overlay, as pairs of keypoint indices.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (WRIST, THUMB_CMC),
    (THUMB_CMC, THUMB_MCP),
    (THUMB_MCP, THUMB_IP),
    (THUMB_IP, THUMB_TIP),
    (WRIST, INDEX_FINGER_MCP),
    (INDEX_FINGER_MCP, INDEX_FINGER_PIP),
    (INDEX_FINGER_PIP, INDEX_FINGER_DIP),
    (INDEX_FINGER_DIP, INDEX_FINGER_TIP),
    (INDEX_FINGER_MCP, MIDDLE_FINGER_MCP),
    (MIDDLE_FINGER_MCP, MIDDLE_FINGER_PIP),
    (MIDDLE_FINGER_PIP, MIDDLE_FINGER_DIP),
    (MIDDLE_FINGER_DIP, MIDDLE_FINGER_TIP),
    (MIDDLE_FINGER_MCP, RING_FINGER_MCP),
    (RING_FINGER_MCP, RING_FINGER_PIP),
    (RING_FINGER_PIP, RING_FINGER_DIP),
    (RING_FINGER_DIP, RING_FINGER_TIP),
    (RING_FINGER_MCP, PINKY_MCP),
    (WRIST, PINKY_MCP),
    (PINKY_MCP, PINKY_PIP),
    (PINKY_PIP, PINKY_DIP),
    (PINKY_DIP, PINKY_TIP),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HAND_LANDMARK_COUNT;

    #[test]
    fn test_connections_reference_valid_points() {
        for (a, b) in HAND_CONNECTIONS {
            assert!(a < HAND_LANDMARK_COUNT && b < HAND_LANDMARK_COUNT);
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_every_point_is_connected() {
        for index in 0..HAND_LANDMARK_COUNT {
            assert!(
                HAND_CONNECTIONS.iter().any(|&(a, b)| a == index || b == index),
                "point {index} has no bone"
            );
        }
    }
}
